//! One compress-then-eliminate sweep over all block indices.

use super::CeConfig;
use crate::block::{Block, CloseBlocks, SparseBlockMatrix};
use crate::error::CeResult;
use crate::linalg::{compress, eliminate};
use nalgebra::DMatrix;
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Factors produced by one level sweep, indexed by block index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelFactors {
    /// Orthogonal compression transform of every block
    pub transforms: Vec<DMatrix<f64>>,
    /// Lower elimination block-column of every block, keyed by block row
    pub lower: Vec<BTreeMap<usize, Block>>,
    /// Upper elimination block-row of every block, keyed by block column
    pub upper: Vec<BTreeMap<usize, Block>>,
    /// Retained size of every block after the sweep
    pub ranks: Vec<usize>,
    /// Size of every block before the sweep
    pub original_sizes: Vec<usize>,
}

impl LevelFactors {
    fn with_capacity(n: usize) -> Self {
        Self {
            transforms: Vec::with_capacity(n),
            lower: Vec::with_capacity(n),
            upper: Vec::with_capacity(n),
            ranks: Vec::with_capacity(n),
            original_sizes: Vec::with_capacity(n),
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.ranks.len()
    }

    /// Total retained dimension after the sweep
    pub fn retained(&self) -> usize {
        self.ranks.iter().sum()
    }

    /// Total dimension before the sweep
    pub fn original(&self) -> usize {
        self.original_sizes.iter().sum()
    }

    /// Fraction of the dimension retained, in `[0, 1]`
    pub fn compression_ratio(&self) -> f64 {
        let original = self.original();
        if original == 0 {
            return 0.0;
        }
        self.retained() as f64 / original as f64
    }
}

/// Compress then eliminate every block index of `matrix` in ascending order.
///
/// On return `matrix` holds the reduced matrix, with `block_sizes` equal to
/// the selected ranks. An error aborts the sweep at the failing index; indices
/// already processed stay reduced.
pub fn run_level(
    matrix: &mut SparseBlockMatrix,
    close: &mut CloseBlocks,
    config: &CeConfig,
    level: usize,
) -> CeResult<LevelFactors> {
    config.validate()?;
    let n = matrix.num_blocks();
    let mut factors = LevelFactors::with_capacity(n);

    for iter in 0..n {
        let neighbors = matrix.neighbors(iter);
        let step = compress(matrix, close, iter, config.tolerance, &neighbors)
            .and_then(|compression| {
                eliminate(matrix, close, iter, &compression)
                    .map(|elimination| (compression, elimination))
            });
        let (compression, elimination) = match step {
            Ok(step) => step,
            Err(err) => {
                error!("Level {} aborted at block {}: {}", level, iter, err);
                return Err(err.into());
            }
        };

        debug!(
            "Level {} block {}: {} row / {} column neighbours, size {} -> rank {}",
            level,
            iter,
            neighbors.row.len(),
            neighbors.col.len(),
            compression.original_size,
            compression.rank
        );

        factors.original_sizes.push(compression.original_size);
        factors.ranks.push(compression.rank);
        factors.transforms.push(compression.transform);
        factors.lower.push(elimination.lower);
        factors.upper.push(elimination.upper);
    }

    Ok(factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::blocks_to_full_matrix;
    use crate::error::CeError;

    /// Block diagonal matrix: every block is eliminated completely
    #[test]
    fn test_block_diagonal_collapses() {
        let mut m = SparseBlockMatrix::new(vec![2, 3]);
        m.insert(0, 0, Block::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]))
            .unwrap();
        m.insert(1, 1, Block::identity(3, 3) * 2.0).unwrap();
        let mut close = CloseBlocks::from_structure(&m);

        let factors = run_level(&mut m, &mut close, &CeConfig::default(), 0).unwrap();
        assert_eq!(factors.ranks, vec![0, 0]);
        assert_eq!(factors.original_sizes, vec![2, 3]);
        assert_eq!(factors.retained(), 0);
        assert_eq!(m.dimension(), 0);
        assert_eq!(m.nnz_blocks(), 0);
    }

    #[test]
    fn test_far_coupling_is_retained() {
        // Blocks 0 and 1 couple through a rank-1 far interaction
        let mut m = SparseBlockMatrix::new(vec![2, 2]);
        m.insert(0, 0, Block::identity(2, 2) * 4.0).unwrap();
        m.insert(1, 1, Block::identity(2, 2) * 5.0).unwrap();
        let coupling = Block::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        m.insert(0, 1, coupling.clone()).unwrap();
        m.insert(1, 0, coupling.transpose()).unwrap();
        let mut close = CloseBlocks::new(2);
        close.insert(0, 0);
        close.insert(1, 1);

        let factors = run_level(&mut m, &mut close, &CeConfig::default(), 0).unwrap();
        assert_eq!(factors.ranks, vec![1, 1]);
        assert!((factors.compression_ratio() - 0.5).abs() < 1e-12);
        assert_eq!(m.block_sizes(), &[1, 1]);
        assert!(m.validate_shapes().is_ok());
        assert!(m.find_zero_block().is_none());
        assert!(blocks_to_full_matrix(&m).is_ok());
    }

    #[test]
    fn test_singular_block_aborts_with_index() {
        let mut m = SparseBlockMatrix::new(vec![1, 1]);
        m.insert(0, 0, Block::from_element(1, 1, 1.0)).unwrap();
        m.insert(1, 1, Block::from_element(1, 1, 0.0)).unwrap();
        m.insert(0, 1, Block::from_element(1, 1, 1.0)).unwrap();
        let mut close = CloseBlocks::from_structure(&m);

        let result = run_level(&mut m, &mut close, &CeConfig::default(), 3);
        assert_eq!(result, Err(CeError::SingularRemainder { block: 1 }));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut m = SparseBlockMatrix::new(vec![1]);
        let mut close = CloseBlocks::new(1);
        let config = CeConfig::default().with_tolerance(-1.0);
        assert!(matches!(
            run_level(&mut m, &mut close, &config, 0),
            Err(CeError::InvalidInput(_))
        ));
    }
}
