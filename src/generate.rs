//! Test matrix generators.
//!
//! [`random_block_matrix`] builds a block matrix directly, with a symmetric
//! block pattern and random dense blocks. [`grid_laplacian`] assembles a raw
//! scalar sparse matrix (2D convection-diffusion stencil) to feed the
//! partitioner.

use crate::block::{Block, CloseBlocks, SparseBlockMatrix};
use crate::error::{CeError, CeResult};
use crate::linalg::{SparseMatrix, conversions};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;

/// Random block matrix with its close sets and block pattern
#[derive(Debug, Clone)]
pub struct GeneratedMatrix {
    pub matrix: SparseBlockMatrix,
    /// Every stored block is declared close
    pub close_blocks: CloseBlocks,
    /// Stored block positions, sorted
    pub pairs: Vec<(usize, usize)>,
}

/// Symmetric block pattern over `n` indices with at least `target` positions
/// (capped at `n * n`). All diagonal positions are included.
fn symmetric_pairs(n: usize, target: f64, rng: &mut ChaCha8Rng) -> BTreeSet<(usize, usize)> {
    let mut pairs: BTreeSet<(usize, usize)> = (0..n).map(|i| (i, i)).collect();
    let target = target.min((n * n) as f64);
    while (pairs.len() as f64) < target {
        let a = rng.random_range(0..n);
        let b = rng.random_range(0..n);
        if a != b && !pairs.contains(&(a, b)) {
            pairs.insert((a, b));
            pairs.insert((b, a));
        }
    }
    pairs
}

/// Generate a random block matrix of roughly `matrix_size` scalar rows.
///
/// The nominal block size is `sqrt(matrix_size * sparsity)`; actual sizes
/// vary by about 10% around it. About `sparsity` of all block positions are
/// populated, symmetrically, with every diagonal block present. Entries are
/// uniform in `[0, 100)`.
pub fn random_block_matrix(matrix_size: usize, sparsity: f64, seed: u64) -> CeResult<GeneratedMatrix> {
    if matrix_size == 0 {
        return Err(CeError::InvalidInput("Matrix size must be positive".to_string()));
    }
    if !(sparsity > 0.0 && sparsity <= 1.0) {
        return Err(CeError::InvalidInput(format!(
            "Sparsity must lie in (0, 1], got {sparsity}"
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let nonzero_elements = ((matrix_size as f64 * sparsity) as usize).max(1);
    let nominal = ((nonzero_elements as f64).sqrt() as usize).max(1);
    let num_blocks = matrix_size.div_ceil(nominal);
    let target = sparsity * (num_blocks * num_blocks) as f64;
    let pairs = symmetric_pairs(num_blocks, target, &mut rng);

    let low = ((nominal as f64 * 0.9) as usize).max(1);
    let high = ((nominal as f64 * 1.1) as usize).max(low);
    let block_sizes: Vec<usize> = (0..num_blocks)
        .map(|_| rng.random_range(low..=high))
        .collect();

    let mut matrix = SparseBlockMatrix::new(block_sizes.clone());
    let mut close = CloseBlocks::new(num_blocks);
    for &(line, col) in &pairs {
        let block = Block::from_fn(block_sizes[line], block_sizes[col], |_, _| {
            rng.random::<f64>() * 100.0
        });
        if matrix.insert(line, col, block)? {
            close.insert(line, col);
        }
    }

    Ok(GeneratedMatrix {
        pairs: matrix.structure().collect(),
        matrix,
        close_blocks: close,
    })
}

/// Five-point convection-diffusion operator on an `nx` by `ny` grid.
///
/// Dirichlet boundaries are eliminated, so unknowns are the interior grid
/// points in row-major order. `convection` is the cell Peclet number of a flow
/// along x; zero gives the symmetric Laplacian.
pub fn grid_laplacian(nx: usize, ny: usize, convection: f64) -> CeResult<SparseMatrix> {
    if nx == 0 || ny == 0 {
        return Err(CeError::InvalidInput(format!(
            "Grid must be non-empty, got {nx}x{ny}"
        )));
    }
    let n = nx * ny;
    let idx = |i: usize, j: usize| j * nx + i;

    let mut rows = Vec::with_capacity(5 * n);
    let mut cols = Vec::with_capacity(5 * n);
    let mut vals = Vec::with_capacity(5 * n);
    let mut push = |r: usize, c: usize, v: f64| {
        rows.push(r);
        cols.push(c);
        vals.push(v);
    };

    for j in 0..ny {
        for i in 0..nx {
            let k = idx(i, j);
            push(k, k, 4.0);
            if i > 0 {
                push(k, idx(i - 1, j), -1.0 - 0.5 * convection);
            }
            if i + 1 < nx {
                push(k, idx(i + 1, j), -1.0 + 0.5 * convection);
            }
            if j > 0 {
                push(k, idx(i, j - 1), -1.0);
            }
            if j + 1 < ny {
                push(k, idx(i, j + 1), -1.0);
            }
        }
    }

    Ok(conversions::triplets_to_sparse(n, n, &rows, &cols, &vals)?)
}
