//! End-to-end tests over the public API: partition a sparse operator, check
//! the block form, then run the multilevel factorization.

use ce_solver::block::{Block, apply_permutation, blocks_to_full_matrix, inverse_permutation};
use ce_solver::generate::{grid_laplacian, random_block_matrix};
use ce_solver::linalg::conversions::{sparse_to_dense, triplets_to_sparse};
use ce_solver::partition::{BfsPartitioner, make_dense_blocks};
use ce_solver::solver::coarsen;
use ce_solver::{CeConfig, CeError, CloseBlocks, MultilevelFactorization, SparseBlockMatrix};
use nalgebra::DVector;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn diagonal_close(num_blocks: usize) -> CloseBlocks {
    let mut close = CloseBlocks::new(num_blocks);
    for i in 0..num_blocks {
        close.insert(i, i);
    }
    close
}

#[test]
fn test_grid_partition_reconstructs_exactly() -> TestResult {
    let sparse = grid_laplacian(12, 10, 0.3)?;
    let partition = make_dense_blocks(&sparse, 8, &BfsPartitioner::new())?;

    assert_eq!(partition.num_blocks(), 15);
    assert_eq!(partition.block_sizes().iter().sum::<usize>(), 120);

    let full = blocks_to_full_matrix(&partition.matrix)?;
    let restored = apply_permutation(&full, &inverse_permutation(&partition.permutation)?)?;
    assert_eq!(restored, sparse_to_dense(&sparse));
    Ok(())
}

#[test]
fn test_partition_invariants() -> TestResult {
    let sparse = grid_laplacian(9, 9, 0.0)?;
    let partition = make_dense_blocks(&sparse, 9, &BfsPartitioner::new())?;

    assert!(partition.matrix.find_zero_block().is_none());
    partition.matrix.validate_shapes()?;
    assert_eq!(
        partition.close_blocks,
        CloseBlocks::from_structure(&partition.matrix)
    );
    for i in 0..partition.num_blocks() {
        assert!(partition.matrix.get(i, i).is_present());
    }
    Ok(())
}

#[test]
fn test_partition_from_unsymmetric_triplets() -> TestResult {
    // Lower bidiagonal: entries only below the diagonal
    let n = 6;
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut vals = Vec::new();
    for i in 0..n {
        rows.push(i);
        cols.push(i);
        vals.push(1.0 + i as f64);
        if i > 0 {
            rows.push(i);
            cols.push(i - 1);
            vals.push(-2.0);
        }
    }
    let sparse = triplets_to_sparse(n, n, &rows, &cols, &vals)?;
    let partition = make_dense_blocks(&sparse, 2, &BfsPartitioner::new())?;

    assert!(partition.matrix.find_zero_block().is_none());
    let full = blocks_to_full_matrix(&partition.matrix)?;
    let restored = apply_permutation(&full, &inverse_permutation(&partition.permutation)?)?;
    assert_eq!(restored, sparse_to_dense(&sparse));
    Ok(())
}

#[test]
fn test_coarsening_conserves_dimension() -> TestResult {
    let generated = random_block_matrix(120, 0.3, 11)?;
    let before = blocks_to_full_matrix(&generated.matrix)?;

    for step in 1..5 {
        let (coarse, close) = coarsen(&generated.matrix, step)?;
        assert_eq!(coarse.dimension(), generated.matrix.dimension());
        assert_eq!(coarse.num_blocks(), generated.matrix.num_blocks().div_ceil(step));
        assert_eq!(blocks_to_full_matrix(&coarse)?, before);
        assert_eq!(close, CloseBlocks::from_structure(&coarse));
    }
    Ok(())
}

#[test]
fn test_two_block_multilevel() -> TestResult {
    let mut m = SparseBlockMatrix::new(vec![2, 2]);
    m.insert(0, 0, Block::from_diagonal(&DVector::from_vec(vec![2.0, 3.0])))?;
    m.insert(1, 1, Block::from_diagonal(&DVector::from_vec(vec![4.0, 5.0])))?;
    let coupling = Block::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
    m.insert(0, 1, coupling.clone())?;
    m.insert(1, 0, coupling.transpose())?;

    let result = MultilevelFactorization::factorize(m, diagonal_close(2), &CeConfig::default())?;

    assert_eq!(result.num_levels(), 2);
    assert_eq!(result.levels[0].ranks, vec![1, 1]);
    assert_eq!(result.levels[0].original_sizes, vec![2, 2]);
    // The coarse level holds one merged block and is eliminated completely
    assert_eq!(result.levels[1].original_sizes, vec![2]);
    assert_eq!(result.summary.final_dimension, 0);
    Ok(())
}

#[test]
fn test_grid_multilevel_factorization() -> TestResult {
    let sparse = grid_laplacian(16, 16, 0.0)?;
    let partition = make_dense_blocks(&sparse, 16, &BfsPartitioner::new())?;
    let num_blocks = partition.num_blocks();

    let result = MultilevelFactorization::factorize(
        partition.matrix,
        diagonal_close(num_blocks),
        &CeConfig::default(),
    )?;

    let summary = &result.summary;
    assert_eq!(summary.initial_dimension, 256);
    assert_eq!(summary.levels[0].num_blocks, num_blocks);
    for level in &summary.levels {
        assert!(level.retained <= level.dimension);
    }
    for (factors, level) in result.levels.iter().zip(&summary.levels) {
        assert_eq!(factors.num_blocks(), level.num_blocks);
        assert_eq!(factors.retained(), level.retained);
        for (transform, &size) in factors.transforms.iter().zip(&factors.original_sizes) {
            assert_eq!(transform.shape(), (size, size));
        }
    }
    assert!(result.reduced.find_zero_block().is_none());
    result.reduced.validate_shapes()?;
    Ok(())
}

#[test]
fn test_random_matrix_multilevel_factorization() -> TestResult {
    let generated = random_block_matrix(60, 0.3, 5)?;
    let num_blocks = generated.matrix.num_blocks();
    let config = CeConfig::default().with_coarsen_step(3);
    let result =
        MultilevelFactorization::factorize(generated.matrix, generated.close_blocks, &config)?;

    assert_eq!(result.summary.levels[0].num_blocks, num_blocks);
    // The first block sees only close neighbours and is eliminated completely
    assert_eq!(result.levels[0].ranks[0], 0);
    assert!(result.reduced.num_blocks() <= 1 || result.summary.final_dimension == 0);
    assert!(result.reduced.find_zero_block().is_none());
    Ok(())
}

#[test]
fn test_singular_block_surfaces_index() {
    let mut m = SparseBlockMatrix::new(vec![1, 1, 1]);
    m.insert(0, 0, Block::from_element(1, 1, 2.0)).unwrap();
    m.insert(2, 2, Block::from_element(1, 1, 2.0)).unwrap();
    m.insert(1, 2, Block::from_element(1, 1, 1.0)).unwrap();
    let close = CloseBlocks::from_structure(&m);

    let result = MultilevelFactorization::factorize(m, close, &CeConfig::default());
    assert!(matches!(result, Err(CeError::SingularRemainder { block: 1 })));
}
