//! Dense reconstruction and permutation helpers.
//!
//! These back the correctness check for partitioning: permuting the original
//! matrix and reassembling the block form must reproduce it exactly.

use super::SparseBlockMatrix;
use crate::error::{CeError, CeResult};
use nalgebra::DMatrix;

/// Starting scalar offset of every block index
pub fn block_offsets(block_sizes: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(block_sizes.len());
    let mut start = 0;
    for &size in block_sizes {
        offsets.push(start);
        start += size;
    }
    offsets
}

/// Assemble the full dense matrix from its block form.
///
/// Fails with [`CeError::ShapeMismatch`] if a stored block disagrees with the
/// declared block sizes; nothing is truncated or padded.
pub fn blocks_to_full_matrix(matrix: &SparseBlockMatrix) -> CeResult<DMatrix<f64>> {
    let sizes = matrix.block_sizes();
    let offsets = block_offsets(sizes);
    let n = matrix.dimension();
    let mut full = DMatrix::<f64>::zeros(n, n);

    for ((row, col), block) in matrix.iter() {
        let expected = (sizes[row], sizes[col]);
        if block.shape() != expected {
            return Err(CeError::ShapeMismatch {
                row,
                col,
                expected,
                found: block.shape(),
            });
        }
        full.view_mut((offsets[row], offsets[col]), expected)
            .copy_from(block);
    }

    Ok(full)
}

/// Inverse of a permutation: `inv[p[i]] = i`
pub fn inverse_permutation(p: &[usize]) -> CeResult<Vec<usize>> {
    let n = p.len();
    let mut inv = vec![usize::MAX; n];
    for (i, &target) in p.iter().enumerate() {
        if target >= n || inv[target] != usize::MAX {
            return Err(CeError::InvalidInput(format!(
                "Not a permutation: entry {target} at position {i}"
            )));
        }
        inv[target] = i;
    }
    Ok(inv)
}

/// Permute rows and columns symmetrically: `out[(i, j)] = m[(p[i], p[j])]`
pub fn apply_permutation(matrix: &DMatrix<f64>, p: &[usize]) -> CeResult<DMatrix<f64>> {
    if p.len() != matrix.nrows() || p.len() != matrix.ncols() {
        return Err(CeError::PermutationSizeMismatch {
            expected: matrix.nrows(),
            found: p.len(),
        });
    }
    if let Some(&bad) = p.iter().find(|&&idx| idx >= p.len()) {
        return Err(CeError::InvalidInput(format!(
            "Permutation entry {bad} out of range for dimension {}",
            p.len()
        )));
    }
    let n = p.len();
    Ok(DMatrix::from_fn(n, n, |i, j| matrix[(p[i], p[j])]))
}
