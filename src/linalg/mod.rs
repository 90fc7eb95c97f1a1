//! Dense block linear algebra for the compress-then-eliminate kernel.
//!
//! - [`compress`]: low-rank truncation of a block's far interactions (SVD)
//! - [`eliminate`]: block LU elimination and Schur-complement update
//! - [`conversions`]: faer sparse input helpers
//!
//! Dense blocks use nalgebra; raw sparse input uses faer.

use nalgebra::DMatrix;
use thiserror::Error;

pub mod compress;
pub mod eliminate;


pub use compress::{Compression, compress};
pub use eliminate::{Elimination, StepFactors, eliminate, elimination_step_factors};

/// Type alias for sparse matrices using faer
pub type SparseMatrix = faer::sparse::SparseColMat<usize, f64>;

/// Linear algebra specific error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinAlgError {
    /// The bottom-right remainder of a diagonal block has no inverse
    #[error("Diagonal block {block} is not invertible")]
    SingularRemainder { block: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A dense decomposition could not be computed
    #[error("Decomposition failed: {0}")]
    Decomposition(String),
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Concatenate blocks side by side. All blocks must share a row count.
pub(crate) fn hstack(rows: usize, blocks: &[&DMatrix<f64>]) -> DMatrix<f64> {
    let cols = blocks.iter().map(|b| b.ncols()).sum();
    let mut out = DMatrix::<f64>::zeros(rows, cols);
    let mut offset = 0;
    for block in blocks {
        debug_assert_eq!(block.nrows(), rows);
        out.view_mut((0, offset), block.shape()).copy_from(*block);
        offset += block.ncols();
    }
    out
}

/// Stack blocks on top of each other. All blocks must share a column count.
pub(crate) fn vstack(cols: usize, blocks: &[&DMatrix<f64>]) -> DMatrix<f64> {
    let rows = blocks.iter().map(|b| b.nrows()).sum();
    let mut out = DMatrix::<f64>::zeros(rows, cols);
    let mut offset = 0;
    for block in blocks {
        debug_assert_eq!(block.ncols(), cols);
        out.view_mut((offset, 0), block.shape()).copy_from(*block);
        offset += block.nrows();
    }
    out
}

/// Utility functions for sparse matrix input
pub mod conversions {
    use super::*;

    /// Create sparse matrix from triplets using faer. Duplicate entries are summed.
    pub fn triplets_to_sparse(
        rows: usize,
        cols: usize,
        row_indices: &[usize],
        col_indices: &[usize],
        values: &[f64],
    ) -> LinAlgResult<SparseMatrix> {
        if row_indices.len() != col_indices.len() || row_indices.len() != values.len() {
            return Err(LinAlgError::InvalidInput(format!(
                "Triplet arrays differ in length: {} rows, {} cols, {} values",
                row_indices.len(),
                col_indices.len(),
                values.len()
            )));
        }

        let triplets: Vec<_> = row_indices
            .iter()
            .zip(col_indices.iter())
            .zip(values.iter())
            .map(|((&row, &col), &val)| faer::sparse::Triplet::new(row, col, val))
            .collect();

        faer::sparse::SparseColMat::try_new_from_triplets(rows, cols, &triplets).map_err(|e| {
            LinAlgError::InvalidInput(format!("Failed to create sparse matrix: {:?}", e))
        })
    }

    /// Visit every stored entry as `(row, col, value)`, column by column
    pub fn for_each_entry(matrix: &SparseMatrix, mut f: impl FnMut(usize, usize, f64)) {
        let m = matrix.as_ref();
        let symbolic = m.symbolic();
        for col in 0..m.ncols() {
            let row_indices = symbolic.row_idx_of_col_raw(col);
            let col_values = m.val_of_col(col);
            for (&row, &value) in row_indices.iter().zip(col_values.iter()) {
                f(row, col, value);
            }
        }
    }

    /// Expand a faer sparse matrix into a dense nalgebra matrix
    pub fn sparse_to_dense(matrix: &SparseMatrix) -> DMatrix<f64> {
        let mut dense = DMatrix::<f64>::zeros(matrix.nrows(), matrix.ncols());
        for_each_entry(matrix, |row, col, value| dense[(row, col)] += value);
        dense
    }
}
