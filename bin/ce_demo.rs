//! Compress-then-eliminate demo
//!
//! Builds a test matrix, splits it into blocks, checks that the block form
//! reproduces the input exactly, and runs the multilevel factorization.
//!
//! # Usage
//! ```bash
//! # 2D convection-diffusion grid, partitioned into blocks of about 16 unknowns
//! cargo run --release --bin ce_demo -- grid --nx 32 --ny 32 --block-size 16
//!
//! # Random block matrix, only diagonal blocks declared close
//! cargo run --release --bin ce_demo -- random --size 400 --sparsity 0.2 --diagonal-close
//! ```

use ce_solver::block::{apply_permutation, blocks_to_full_matrix, inverse_permutation};
use ce_solver::generate::{grid_laplacian, random_block_matrix};
use ce_solver::linalg::conversions::sparse_to_dense;
use ce_solver::partition::{BfsPartitioner, GraphPartitioner, make_dense_blocks};
use ce_solver::{CeConfig, CloseBlocks, MultilevelFactorization, SparseBlockMatrix, init_logger};
use clap::{Parser, Subcommand, ValueEnum};
use std::error::Error;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ce_demo")]
#[command(about = "Multilevel compress-then-eliminate factorization demo")]
struct Args {
    #[command(subcommand)]
    input: Input,

    /// Relative singular value cut-off for far-field compression
    #[arg(short, long, default_value = "1e-6")]
    tolerance: f64,

    /// Number of consecutive blocks merged between levels
    #[arg(long, default_value = "2")]
    coarsen_step: usize,

    /// Stop after this many levels
    #[arg(long)]
    max_levels: Option<usize>,

    /// Declare only diagonal blocks close, so every off-diagonal block is compressed
    #[arg(long)]
    diagonal_close: bool,
}

#[derive(Subcommand)]
enum Input {
    /// Five-point convection-diffusion operator on a 2D grid
    Grid {
        #[arg(long, default_value = "32")]
        nx: usize,

        #[arg(long, default_value = "32")]
        ny: usize,

        /// Cell Peclet number of the flow along x
        #[arg(long, default_value = "0.0")]
        convection: f64,

        /// Target number of unknowns per block
        #[arg(short, long, default_value = "16")]
        block_size: usize,

        #[arg(short, long, value_enum, default_value = "bfs")]
        partitioner: PartitionerKind,
    },
    /// Random block matrix with a symmetric block pattern
    Random {
        /// Approximate number of scalar rows
        #[arg(short, long, default_value = "400")]
        size: usize,

        /// Fraction of populated block positions
        #[arg(long, default_value = "0.2")]
        sparsity: f64,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PartitionerKind {
    Bfs,
    /// Requires the `metis` feature
    Metis,
}

fn partitioner(kind: PartitionerKind) -> Result<Box<dyn GraphPartitioner>, Box<dyn Error>> {
    match kind {
        PartitionerKind::Bfs => Ok(Box::new(BfsPartitioner::new())),
        #[cfg(feature = "metis")]
        PartitionerKind::Metis => Ok(Box::new(ce_solver::partition::MetisPartitioner::new())),
        #[cfg(not(feature = "metis"))]
        PartitionerKind::Metis => Err("METIS support requires building with --features metis".into()),
    }
}

fn build_input(input: &Input) -> Result<(SparseBlockMatrix, CloseBlocks), Box<dyn Error>> {
    match *input {
        Input::Grid {
            nx,
            ny,
            convection,
            block_size,
            partitioner: kind,
        } => {
            let start = Instant::now();
            let sparse = grid_laplacian(nx, ny, convection)?;
            let partitioner = partitioner(kind)?;
            let partition = make_dense_blocks(&sparse, block_size, partitioner.as_ref())?;
            info!(
                "Partitioned {}x{} grid ({} unknowns) into {} blocks in {:?}",
                nx,
                ny,
                sparse.nrows(),
                partition.num_blocks(),
                start.elapsed()
            );

            // The block form must reproduce the input exactly
            let full = blocks_to_full_matrix(&partition.matrix)?;
            let restored = apply_permutation(&full, &inverse_permutation(&partition.permutation)?)?;
            let diff = (restored - sparse_to_dense(&sparse)).abs().max();
            if diff == 0.0 {
                info!("Reconstruction check: exact");
            } else {
                warn!("Reconstruction check: max difference {:e}", diff);
            }

            Ok((partition.matrix, partition.close_blocks))
        }
        Input::Random {
            size,
            sparsity,
            seed,
        } => {
            let generated = random_block_matrix(size, sparsity, seed)?;
            info!(
                "Generated random block matrix: {} blocks, dimension {}, {} nonzero blocks",
                generated.matrix.num_blocks(),
                generated.matrix.dimension(),
                generated.pairs.len()
            );
            Ok((generated.matrix, generated.close_blocks))
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    init_logger();

    info!("CE-SOLVER MULTILEVEL FACTORIZATION");
    info!("");

    let mut config = CeConfig::new()
        .with_tolerance(args.tolerance)
        .with_coarsen_step(args.coarsen_step);
    if let Some(max_levels) = args.max_levels {
        config = config.with_max_levels(max_levels);
    }
    config.validate()?;

    let (matrix, mut close) = build_input(&args.input)?;
    if args.diagonal_close {
        close = CloseBlocks::new(matrix.num_blocks());
        for i in 0..matrix.num_blocks() {
            close.insert(i, i);
        }
    }

    info!("Configuration:");
    info!("  Tolerance: {:e}", config.tolerance);
    info!("  Coarsening step: {}", config.coarsen_step);
    info!("  Max levels: {:?}", config.max_levels);
    info!("");

    let factorization = MultilevelFactorization::factorize(matrix, close, &config)?;
    println!("{}", factorization.summary);

    Ok(())
}
