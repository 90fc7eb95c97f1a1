//! # Far-field compression
//!
//! For a block index `iter`, the far interactions of row and column `iter`
//! (nonzero blocks whose index is not in `close[iter]`) are stacked into one
//! matrix
//!
//! ```text
//! far_blocks = [ M[iter, c0] M[iter, c1] ... | M[l0, iter]ᵀ M[l1, iter]ᵀ ... ]
//! ```
//!
//! and its left singular basis `U` is applied as an orthogonal change of basis
//! to block `iter`:
//!
//! ```text
//! M[iter, iter] <- Uᵀ M[iter, iter] U
//! M[l, iter]    <- M[l, iter] U
//! M[iter, c]    <- Uᵀ M[iter, c]
//! ```
//!
//! After the rotation the far blocks only carry information in their first
//! `r` rows (or columns), where `r` counts singular values with
//! `s / s_max > eps`. The rest is discarded, which is the only lossy step of
//! the whole factorization.

use super::{LinAlgError, LinAlgResult, hstack, vstack};
use crate::block::{Block, CloseBlocks, Neighbors, SparseBlockMatrix};
use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::debug;

/// Outcome of compressing one block index
#[derive(Debug, Clone, PartialEq)]
pub struct Compression {
    /// Orthogonal change of basis `U` applied to block `iter`
    pub transform: DMatrix<f64>,
    /// Number of retained far directions
    pub rank: usize,
    /// Extent of block `iter` before compression
    pub original_size: usize,
}

impl Compression {
    fn identity(size: usize) -> Self {
        Self {
            transform: DMatrix::identity(size, size),
            rank: 0,
            original_size: size,
        }
    }
}

/// Compress the far interactions of block row/column `iter` in place.
///
/// `neighbors` must be captured from the matrix before this call. Close
/// neighbours are rotated but keep their full extent; far neighbours are
/// truncated to the selected rank. Blocks that become zero are pruned, which
/// may remove entries from `close`; no entry is ever added.
pub fn compress(
    matrix: &mut SparseBlockMatrix,
    close: &mut CloseBlocks,
    iter: usize,
    eps: f64,
    neighbors: &Neighbors,
) -> LinAlgResult<Compression> {
    if iter >= matrix.num_blocks() {
        return Err(LinAlgError::InvalidInput(format!(
            "Block index {iter} out of range for {} blocks",
            matrix.num_blocks()
        )));
    }
    if !eps.is_finite() || eps < 0.0 {
        return Err(LinAlgError::InvalidInput(format!(
            "Compression tolerance must be finite and non-negative, got {eps}"
        )));
    }

    let size = matrix.block_size(iter);
    let far_row: Vec<usize> = neighbors
        .row
        .iter()
        .copied()
        .filter(|&col| !close.contains(iter, col))
        .collect();
    let far_col: Vec<usize> = neighbors
        .col
        .iter()
        .copied()
        .filter(|&line| !close.contains(iter, line))
        .collect();

    if size == 0 || (far_row.is_empty() && far_col.is_empty()) {
        debug!(block = iter, size, "no far interactions, skipping compression");
        return Ok(Compression::identity(size));
    }

    let far_blocks = stack_far_blocks(matrix, iter, size, &far_row, &far_col);
    let (transform, singular_values) = left_singular_basis(far_blocks)?;
    let rank = select_rank(&singular_values, eps);

    apply_transform(matrix, close, iter, &transform, neighbors);
    truncate_far_blocks(matrix, close, iter, rank, &far_row, &far_col);

    debug!(
        block = iter,
        size,
        rank,
        far_rows = far_row.len(),
        far_cols = far_col.len(),
        "compressed far interactions"
    );

    Ok(Compression {
        transform,
        rank,
        original_size: size,
    })
}

/// Number of singular values above the relative tolerance.
///
/// `singular_values` must be sorted in descending order. A zero leading
/// singular value means the far interaction is already exactly zero.
pub fn select_rank(singular_values: &[f64], eps: f64) -> usize {
    match singular_values.first() {
        Some(&largest) if largest > 0.0 => singular_values
            .iter()
            .filter(|&&s| s / largest > eps)
            .count(),
        _ => 0,
    }
}

/// `[ far row blocks | far column blocksᵀ ]`, zero-padded to at least `size` columns
fn stack_far_blocks(
    matrix: &SparseBlockMatrix,
    iter: usize,
    size: usize,
    far_row: &[usize],
    far_col: &[usize],
) -> DMatrix<f64> {
    let row_blocks: Vec<&Block> = far_row
        .iter()
        .filter_map(|&col| matrix.block(iter, col))
        .collect();
    let col_blocks: Vec<&Block> = far_col
        .iter()
        .filter_map(|&line| matrix.block(line, iter))
        .collect();

    let far_line = hstack(size, &row_blocks);
    let far_column = vstack(size, &col_blocks).transpose();
    let padding = size.saturating_sub(far_line.ncols() + far_column.ncols());
    let zeros = DMatrix::<f64>::zeros(size, padding);

    hstack(size, &[&far_line, &far_column, &zeros])
}

/// Full square left singular basis with singular values in descending order
fn left_singular_basis(far_blocks: DMatrix<f64>) -> LinAlgResult<(DMatrix<f64>, Vec<f64>)> {
    let n = far_blocks.nrows();
    let svd = far_blocks.svd(true, false);
    let u = svd.u.ok_or_else(|| {
        LinAlgError::Decomposition("SVD did not produce left singular vectors".to_string())
    })?;
    let values: Vec<f64> = svd.singular_values.iter().copied().collect();

    if u.shape() != (n, n) {
        return Err(LinAlgError::Decomposition(format!(
            "Expected a {n}x{n} left singular basis, got {:?}",
            u.shape()
        )));
    }
    if values.iter().any(|s| !s.is_finite()) {
        return Err(LinAlgError::Decomposition(
            "Non-finite singular value in far interaction".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));

    let sorted_u = DMatrix::from_fn(n, n, |i, j| u[(i, order[j])]);
    let sorted_values = order.iter().map(|&k| values[k]).collect();
    Ok((sorted_u, sorted_values))
}

/// Rotate block `iter` and all of its neighbours by `u`.
///
/// The neighbour products are independent and computed in parallel from the
/// current matrix state; writes and pruning happen afterwards.
fn apply_transform(
    matrix: &mut SparseBlockMatrix,
    close: &mut CloseBlocks,
    iter: usize,
    u: &DMatrix<f64>,
    neighbors: &Neighbors,
) {
    let ut = u.transpose();

    let updates: Vec<((usize, usize), Block)> = {
        let snapshot: &SparseBlockMatrix = matrix;
        let column_updates = neighbors.col.par_iter().filter_map(|&line| {
            snapshot
                .block(line, iter)
                .map(|block| ((line, iter), block * u))
        });
        let row_updates = neighbors.row.par_iter().filter_map(|&col| {
            snapshot
                .block(iter, col)
                .map(|block| ((iter, col), &ut * block))
        });
        let diagonal = snapshot
            .block(iter, iter)
            .map(|block| ((iter, iter), &ut * block * u));

        column_updates
            .chain(row_updates)
            .chain(diagonal.into_par_iter())
            .collect()
    };

    for ((line, col), block) in updates {
        matrix.set_block(line, col, block);
        matrix.prune_zero_block(line, col, close);
    }
}

fn truncate_far_blocks(
    matrix: &mut SparseBlockMatrix,
    close: &mut CloseBlocks,
    iter: usize,
    rank: usize,
    far_row: &[usize],
    far_col: &[usize],
) {
    for &col in far_row {
        if let Some(block) = matrix.remove_block(iter, col) {
            matrix.set_block(iter, col, block.rows(0, rank).into_owned());
            matrix.prune_zero_block(iter, col, close);
        }
    }
    for &line in far_col {
        if let Some(block) = matrix.remove_block(line, iter) {
            matrix.set_block(line, iter, block.columns(0, rank).into_owned());
            matrix.prune_zero_block(line, iter, close);
        }
    }
}
