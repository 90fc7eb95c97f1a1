//! # Block elimination
//!
//! After compression, block `iter` of size `s` splits into `r` retained
//! coordinates and `e = s - r` coordinates that only interact with close
//! blocks. Those `e` coordinates are eliminated with a block LU step:
//!
//! ```text
//! A3 = M[iter, iter][r.., r..] = L U        (row pivoting folded into L)
//!
//! lower column:  M[i, iter][:, r..] U⁻¹      and  [ M[iter, iter][..r, r..] U⁻¹ ; L ]
//! upper row:     L⁻¹ M[iter, j][r.., :]      and  [ L⁻¹ M[iter, iter][r.., ..r] , U ]
//!
//! Schur update for every (line, col) in C x C, C = close[iter] ∪ {iter}:
//!     M[line, col] -= M[line, iter][:, r..] A3⁻¹ M[iter, col][r.., :]
//! ```
//!
//! Row and column `iter` are cut down to their first `r` coordinates; the
//! eliminated part of the diagonal is the identity and is not stored.

use super::compress::Compression;
use super::{LinAlgError, LinAlgResult, hstack, vstack};
use crate::block::{Block, CloseBlocks, SparseBlockMatrix, block_offsets, is_zero_block};
use nalgebra::{DMatrix, Dyn, LU, PermutationSequence};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Elimination factors of one block index
#[derive(Debug, Clone, PartialEq)]
pub struct Elimination {
    /// Lower factor block-column, keyed by block row. Block `iter` holds
    /// `[M[iter, iter][..r, r..] U⁻¹ ; L]`.
    pub lower: BTreeMap<usize, Block>,
    /// Upper factor block-row, keyed by block column. Block `iter` holds
    /// `[L⁻¹ M[iter, iter][r.., ..r] , U]`.
    pub upper: BTreeMap<usize, Block>,
    /// Retained size of the block after elimination
    pub rank: usize,
    /// Number of eliminated coordinates
    pub eliminated: usize,
}

/// LU factorization of the remainder quadrant `A3`
struct RemainderLu {
    lu: Option<LU<f64, Dyn, Dyn>>,
    permutation: Option<PermutationSequence<Dyn>>,
    unit_lower: DMatrix<f64>,
    upper: DMatrix<f64>,
    size: usize,
    block: usize,
}

impl RemainderLu {
    fn factor(a3: DMatrix<f64>, block: usize) -> LinAlgResult<Self> {
        let size = a3.nrows();
        if size == 0 {
            return Ok(Self {
                lu: None,
                permutation: None,
                unit_lower: DMatrix::zeros(0, 0),
                upper: DMatrix::zeros(0, 0),
                size,
                block,
            });
        }

        let lu = a3.lu();
        let upper = lu.u();
        if !lu.is_invertible() || upper.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::SingularRemainder { block });
        }

        Ok(Self {
            permutation: Some(lu.p().clone()),
            unit_lower: lu.l(),
            upper,
            lu: Some(lu),
            size,
            block,
        })
    }

    /// Lower factor with the row permutation folded in, so that `A3 = L U`
    fn folded_lower(&self) -> DMatrix<f64> {
        let mut lower = self.unit_lower.clone();
        if let Some(p) = &self.permutation {
            p.inv_permute_rows(&mut lower);
        }
        lower
    }

    /// `A3⁻¹ rhs`
    fn solve(&self, rhs: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
        match &self.lu {
            Some(lu) => lu.solve(rhs).ok_or(LinAlgError::SingularRemainder { block: self.block }),
            None => Ok(DMatrix::zeros(0, rhs.ncols())),
        }
    }

    /// `x U⁻¹`
    fn right_upper_inverse(&self, x: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
        if self.size == 0 {
            return Ok(DMatrix::zeros(x.nrows(), 0));
        }
        self.upper
            .transpose()
            .solve_lower_triangular(&x.transpose())
            .map(|z| z.transpose())
            .ok_or(LinAlgError::SingularRemainder { block: self.block })
    }

    /// `L⁻¹ y` for the folded lower factor
    fn left_lower_inverse(&self, y: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
        if self.size == 0 {
            return Ok(DMatrix::zeros(0, y.ncols()));
        }
        let mut permuted = y.clone();
        if let Some(p) = &self.permutation {
            p.permute_rows(&mut permuted);
        }
        self.unit_lower
            .solve_lower_triangular(&permuted)
            .ok_or(LinAlgError::SingularRemainder { block: self.block })
    }
}

/// Eliminate the non-retained coordinates of block `iter` in place.
///
/// `compression` must be the result of compressing `iter` on this matrix.
/// Invertibility of the remainder quadrant is checked before anything is
/// written: on [`LinAlgError::SingularRemainder`] the matrix and close sets are
/// left exactly as they were.
pub fn eliminate(
    matrix: &mut SparseBlockMatrix,
    close: &mut CloseBlocks,
    iter: usize,
    compression: &Compression,
) -> LinAlgResult<Elimination> {
    if iter >= matrix.num_blocks() {
        return Err(LinAlgError::InvalidInput(format!(
            "Block index {iter} out of range for {} blocks",
            matrix.num_blocks()
        )));
    }
    let size = compression.original_size;
    let rank = compression.rank;
    if rank > size || matrix.block_size(iter) != size {
        return Err(LinAlgError::InvalidInput(format!(
            "Compression of block {iter} (size {size}, rank {rank}) does not match block size {}",
            matrix.block_size(iter)
        )));
    }
    let eliminated = size - rank;

    let diag = matrix.get(iter, iter).to_dense();
    let remainder = RemainderLu::factor(diag.view((rank, rank), (eliminated, eliminated)).into_owned(), iter)?;

    let mut members: BTreeSet<usize> = close.row(iter).clone();
    members.insert(iter);

    // Remainder parts of column iter ([:, r..]) and row iter ([r.., :]) per member,
    // read before any block is rewritten.
    let column_remainder: BTreeMap<usize, DMatrix<f64>> = members
        .iter()
        .filter_map(|&line| {
            if line == iter {
                return Some((line, diag.view((0, rank), (rank, eliminated)).into_owned()));
            }
            matrix
                .block(line, iter)
                .filter(|block| block.ncols() == size && eliminated > 0)
                .map(|block| (line, block.columns(rank, eliminated).into_owned()))
        })
        .collect();
    let row_remainder: BTreeMap<usize, DMatrix<f64>> = members
        .iter()
        .filter_map(|&col| {
            if col == iter {
                return Some((col, diag.view((rank, 0), (eliminated, rank)).into_owned()));
            }
            matrix
                .block(iter, col)
                .filter(|block| block.nrows() == size && eliminated > 0)
                .map(|block| (col, block.rows(rank, eliminated).into_owned()))
        })
        .collect();

    // A3⁻¹ M[iter, col][r.., :]
    let solved: BTreeMap<usize, DMatrix<f64>> = row_remainder
        .par_iter()
        .map(|(&col, rem)| remainder.solve(rem).map(|y| (col, y)))
        .collect::<LinAlgResult<_>>()?;

    let lower = lower_factor(&remainder, iter, &column_remainder)?;
    let upper = upper_factor(&remainder, iter, &row_remainder)?;

    let pairs: Vec<(usize, usize)> = members
        .iter()
        .flat_map(|&line| members.iter().map(move |&col| (line, col)))
        .collect();

    let updates: Vec<((usize, usize), Block)> = {
        let snapshot: &SparseBlockMatrix = matrix;
        pairs
            .par_iter()
            .filter_map(|&(line, col)| {
                let correction = match (column_remainder.get(&line), solved.get(&col)) {
                    (Some(left), Some(right)) if eliminated > 0 => Some(left * right),
                    _ => None,
                };
                schur_block(snapshot, &diag, iter, rank, line, col, correction)
                    .map(|block| ((line, col), block))
            })
            .collect()
    };

    for ((line, col), block) in updates {
        matrix.set_block(line, col, block);
        matrix.prune_zero_block(line, col, close);
    }
    matrix.set_block_size(iter, rank);

    debug!(
        block = iter,
        size,
        rank,
        close = members.len(),
        "eliminated block"
    );
    debug_assert!(matrix.validate_shapes().is_ok());

    Ok(Elimination {
        lower,
        upper,
        rank,
        eliminated,
    })
}

/// New value of block `(line, col)` after eliminating `iter`, or `None` if the
/// block is unaffected.
fn schur_block(
    matrix: &SparseBlockMatrix,
    diag: &DMatrix<f64>,
    iter: usize,
    rank: usize,
    line: usize,
    col: usize,
    correction: Option<DMatrix<f64>>,
) -> Option<Block> {
    let base = if line == iter && col == iter {
        diag.view((0, 0), (rank, rank)).into_owned()
    } else if line == iter {
        match matrix.block(iter, col) {
            Some(block) => block.rows(0, rank).into_owned(),
            None => Block::zeros(rank, matrix.block_size(col)),
        }
    } else if col == iter {
        match matrix.block(line, iter) {
            Some(block) => block.columns(0, rank).into_owned(),
            None => Block::zeros(matrix.block_size(line), rank),
        }
    } else {
        // General pairs only change when there is something to subtract
        let correction = correction?;
        return Some(matrix.get(line, col).to_dense() - correction);
    };

    Some(match correction {
        Some(correction) => base - correction,
        None => base,
    })
}

fn lower_factor(
    remainder: &RemainderLu,
    iter: usize,
    column_remainder: &BTreeMap<usize, DMatrix<f64>>,
) -> LinAlgResult<BTreeMap<usize, Block>> {
    let mut lower = BTreeMap::new();
    for (&line, rem) in column_remainder {
        let mut block = remainder.right_upper_inverse(rem)?;
        if line == iter {
            let l = remainder.folded_lower();
            block = vstack(remainder.size, &[&block, &l]);
        }
        if !is_zero_block(&block) {
            lower.insert(line, block);
        }
    }
    Ok(lower)
}

fn upper_factor(
    remainder: &RemainderLu,
    iter: usize,
    row_remainder: &BTreeMap<usize, DMatrix<f64>>,
) -> LinAlgResult<BTreeMap<usize, Block>> {
    let mut upper = BTreeMap::new();
    for (&col, rem) in row_remainder {
        let mut block = remainder.left_lower_inverse(rem)?;
        if col == iter {
            block = hstack(remainder.size, &[&block, &remainder.upper]);
        }
        if !is_zero_block(&block) {
            upper.insert(col, block);
        }
    }
    Ok(upper)
}

/// Dense form of one compress + eliminate step, for verification.
///
/// All matrices live in the coordinates of the matrix right before block
/// `iter` was compressed. With exact (lossless) truncation they satisfy
/// `transformᵀ · M · transform == lower · reduced · upper`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFactors {
    /// `Q`: identity with the compression transform at block `iter`
    pub transform: DMatrix<f64>,
    /// `M_L`: identity with the lower block-column in the eliminated columns
    pub lower: DMatrix<f64>,
    /// `M_iter`: Schur-reduced matrix, identity on the eliminated coordinates
    pub reduced: DMatrix<f64>,
    /// `M_R`: identity with the upper block-row in the eliminated rows
    pub upper: DMatrix<f64>,
}

impl StepFactors {
    /// `M_L · M_iter · M_R`
    pub fn product(&self) -> DMatrix<f64> {
        &self.lower * &self.reduced * &self.upper
    }
}

/// Assemble the dense step factors from the matrix state right after
/// eliminating `iter`.
pub fn elimination_step_factors(
    reduced: &SparseBlockMatrix,
    iter: usize,
    compression: &Compression,
    elimination: &Elimination,
) -> LinAlgResult<StepFactors> {
    let mut sizes = reduced.block_sizes().to_vec();
    if iter >= sizes.len() || sizes[iter] != compression.rank {
        return Err(LinAlgError::InvalidInput(format!(
            "Block {iter} has not been eliminated in this matrix"
        )));
    }
    sizes[iter] = compression.original_size;
    let offsets = block_offsets(&sizes);
    let n: usize = sizes.iter().sum();
    let rank = compression.rank;
    let eliminated_start = offsets[iter] + rank;
    let eliminated = elimination.eliminated;

    let mut transform = DMatrix::<f64>::identity(n, n);
    transform
        .view_mut((offsets[iter], offsets[iter]), compression.transform.shape())
        .copy_from(&compression.transform);

    let mut lower = DMatrix::<f64>::identity(n, n);
    for (&line, block) in &elimination.lower {
        lower
            .view_mut((offsets[line], eliminated_start), block.shape())
            .copy_from(block);
    }

    let mut upper = DMatrix::<f64>::identity(n, n);
    for (&col, block) in &elimination.upper {
        upper
            .view_mut((eliminated_start, offsets[col]), block.shape())
            .copy_from(block);
    }

    let mut dense = DMatrix::<f64>::zeros(n, n);
    for ((line, col), block) in reduced.iter() {
        dense
            .view_mut((offsets[line], offsets[col]), block.shape())
            .copy_from(block);
    }
    for k in eliminated_start..eliminated_start + eliminated {
        dense[(k, k)] = 1.0;
    }

    Ok(StepFactors {
        transform,
        lower,
        reduced: dense,
        upper,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Neighbors;
    use crate::linalg::compress::compress;

    fn no_compression(size: usize) -> Compression {
        Compression {
            transform: DMatrix::identity(size, size),
            rank: 0,
            original_size: size,
        }
    }

    #[test]
    fn test_singular_remainder_leaves_matrix_untouched() {
        let mut m = SparseBlockMatrix::new(vec![2]);
        m.insert(0, 0, DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        let mut close = CloseBlocks::from_structure(&m);
        let (before, close_before) = (m.clone(), close.clone());

        let compression = compress(&mut m, &mut close, 0, 1e-6, &Neighbors::default()).unwrap();
        assert_eq!(compression.rank, 0);

        let err = eliminate(&mut m, &mut close, 0, &compression).unwrap_err();
        assert_eq!(err, LinAlgError::SingularRemainder { block: 0 });
        assert_eq!(m, before);
        assert_eq!(close, close_before);
    }

    #[test]
    fn test_absent_diagonal_is_singular() {
        let mut m = SparseBlockMatrix::new(vec![2, 1]);
        m.insert(0, 1, DMatrix::from_element(2, 1, 1.0)).unwrap();
        let mut close = CloseBlocks::from_structure(&m);
        let err = eliminate(&mut m, &mut close, 0, &no_compression(2)).unwrap_err();
        assert_eq!(err, LinAlgError::SingularRemainder { block: 0 });
    }

    #[test]
    fn test_full_elimination_of_single_block() {
        let a = DMatrix::from_row_slice(2, 2, &[0.0, 2.0, 3.0, 1.0]);
        let mut m = SparseBlockMatrix::new(vec![2]);
        m.insert(0, 0, a.clone()).unwrap();
        let mut close = CloseBlocks::from_structure(&m);

        let result = eliminate(&mut m, &mut close, 0, &no_compression(2)).unwrap();
        assert_eq!(result.rank, 0);
        assert_eq!(result.eliminated, 2);
        assert_eq!(m.block_sizes(), &[0]);
        assert_eq!(m.nnz_blocks(), 0);

        // L U reproduces the pivoted block
        let l = &result.lower[&0];
        let u = &result.upper[&0];
        assert!((l * u - a).abs().max() < 1e-12);
        // U is plain upper triangular
        assert_eq!(u[(1, 0)], 0.0);
    }

    #[test]
    fn test_nothing_to_eliminate_keeps_blocks() {
        let mut m = SparseBlockMatrix::new(vec![2, 2]);
        m.insert(0, 0, DMatrix::identity(2, 2)).unwrap();
        m.insert(0, 1, DMatrix::from_element(2, 2, 0.5)).unwrap();
        m.insert(1, 1, DMatrix::identity(2, 2)).unwrap();
        let mut close = CloseBlocks::from_structure(&m);
        let before = m.clone();

        let compression = Compression {
            transform: DMatrix::identity(2, 2),
            rank: 2,
            original_size: 2,
        };
        let result = eliminate(&mut m, &mut close, 0, &compression).unwrap();
        assert_eq!(result.eliminated, 0);
        assert!(result.lower.is_empty());
        assert!(result.upper.is_empty());
        assert_eq!(m, before);
    }

    #[test]
    fn test_schur_update_with_fill_in() {
        // Arrow pattern: block 0 couples 1 and 2, which are otherwise disjoint
        let mut m = SparseBlockMatrix::new(vec![1, 1, 1]);
        m.insert(0, 0, DMatrix::from_element(1, 1, 2.0)).unwrap();
        m.insert(0, 1, DMatrix::from_element(1, 1, 1.0)).unwrap();
        m.insert(0, 2, DMatrix::from_element(1, 1, 4.0)).unwrap();
        m.insert(1, 0, DMatrix::from_element(1, 1, 3.0)).unwrap();
        m.insert(2, 0, DMatrix::from_element(1, 1, 1.0)).unwrap();
        m.insert(1, 1, DMatrix::from_element(1, 1, 5.0)).unwrap();
        m.insert(2, 2, DMatrix::from_element(1, 1, 7.0)).unwrap();
        let mut close = CloseBlocks::from_structure(&m);

        eliminate(&mut m, &mut close, 0, &no_compression(1)).unwrap();

        let value = |l: usize, c: usize| m.get(l, c).to_dense()[(0, 0)];
        assert!((value(1, 1) - (5.0 - 3.0 * 1.0 / 2.0)).abs() < 1e-12);
        assert!((value(2, 2) - (7.0 - 1.0 * 4.0 / 2.0)).abs() < 1e-12);
        assert!((value(1, 2) - (-3.0 * 4.0 / 2.0)).abs() < 1e-12);
        assert!((value(2, 1) - (-1.0 * 1.0 / 2.0)).abs() < 1e-12);
        // Row and column 0 are gone
        assert!(m.neighbors(0).is_empty());
        assert_eq!(m.block_size(0), 0);
        // Fill-in is not declared close
        assert!(!close.contains(1, 2));
        assert!(m.find_zero_block().is_none());
        assert!(m.validate_shapes().is_ok());
    }

    #[test]
    fn test_step_factors_reproduce_block() {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.5, 2.0, 5.0, 1.0, 0.0, 1.0, 3.0]);
        let b = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 2.0, 1.0, 1.0]);
        let c = DMatrix::from_row_slice(2, 3, &[0.5, 0.0, 1.0, 1.0, 1.0, 0.0]);
        let d = DMatrix::from_row_slice(2, 2, &[6.0, 1.0, 1.0, 6.0]);

        let mut m = SparseBlockMatrix::new(vec![3, 2]);
        m.insert(0, 0, a).unwrap();
        m.insert(0, 1, b).unwrap();
        m.insert(1, 0, c).unwrap();
        m.insert(1, 1, d).unwrap();
        let original = crate::block::blocks_to_full_matrix(&m).unwrap();
        let mut close = CloseBlocks::from_structure(&m);

        // Keep one coordinate, eliminate two
        let compression = Compression {
            transform: DMatrix::identity(3, 3),
            rank: 1,
            original_size: 3,
        };
        let elimination = eliminate(&mut m, &mut close, 0, &compression).unwrap();
        let step = elimination_step_factors(&m, 0, &compression, &elimination).unwrap();

        let lhs = step.transform.transpose() * &original * &step.transform;
        assert!((lhs - step.product()).abs().max() < 1e-10);
    }
}
