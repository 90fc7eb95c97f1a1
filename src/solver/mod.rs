//! Multilevel compress-then-eliminate factorization.
//!
//! A level sweeps every block index once ([`run_level`]): the far
//! interactions of the block are compressed to their numerical rank, then the
//! discarded coordinates are eliminated into a Schur complement over the close
//! blocks. The reduced blocks are merged ([`coarsen`]) and the next level runs
//! on the coarser matrix, until a single block remains.

pub mod coarsen;
pub mod level;

pub use coarsen::coarsen;
pub use level::{LevelFactors, run_level};

use crate::block::{CloseBlocks, SparseBlockMatrix};
use crate::error::{CeError, CeResult};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::info;

/// Configuration for the multilevel factorization
#[derive(Debug, Clone, PartialEq)]
pub struct CeConfig {
    /// Relative singular value cut-off for far-field compression
    pub tolerance: f64,
    /// Number of consecutive blocks merged between levels
    pub coarsen_step: usize,
    /// Stop after this many levels. `None` runs until one block remains.
    pub max_levels: Option<usize>,
}

impl Default for CeConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            coarsen_step: 2,
            max_levels: None,
        }
    }
}

impl CeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_coarsen_step(mut self, step: usize) -> Self {
        self.coarsen_step = step;
        self
    }

    pub fn with_max_levels(mut self, max_levels: usize) -> Self {
        self.max_levels = Some(max_levels);
        self
    }

    pub fn validate(&self) -> CeResult<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(CeError::InvalidInput(format!(
                "Tolerance must be finite and non-negative, got {}",
                self.tolerance
            )));
        }
        if self.coarsen_step == 0 {
            return Err(CeError::InvalidInput(
                "Coarsening step must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-level statistics of a factorization run
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSummary {
    pub level: usize,
    pub num_blocks: usize,
    pub dimension: usize,
    pub retained: usize,
    pub nnz_blocks: usize,
}

impl LevelSummary {
    pub fn compression_ratio(&self) -> f64 {
        if self.dimension == 0 {
            0.0
        } else {
            self.retained as f64 / self.dimension as f64
        }
    }
}

/// Summary statistics of a multilevel factorization
#[derive(Debug, Clone)]
pub struct FactorizationSummary {
    pub levels: Vec<LevelSummary>,
    pub initial_dimension: usize,
    pub final_dimension: usize,
    pub total_time: Duration,
}

impl fmt::Display for FactorizationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Compress-Eliminate Factorization Summary ===")?;
        writeln!(f, "Levels:            {}", self.levels.len())?;
        writeln!(f, "Initial dimension: {}", self.initial_dimension)?;
        writeln!(f, "Final dimension:   {}", self.final_dimension)?;
        for level in &self.levels {
            writeln!(
                f,
                "  level {:>2}: {:>5} blocks, {:>7} -> {:>7} ({:.1}%), {} nonzero blocks",
                level.level,
                level.num_blocks,
                level.dimension,
                level.retained,
                100.0 * level.compression_ratio(),
                level.nnz_blocks
            )?;
        }
        writeln!(f, "Total time:        {:?}", self.total_time)?;
        Ok(())
    }
}

/// Factors of all levels and the final reduced matrix
#[derive(Debug, Clone)]
pub struct MultilevelFactorization {
    pub levels: Vec<LevelFactors>,
    /// Matrix left after the last level, before any further coarsening
    pub reduced: SparseBlockMatrix,
    pub summary: FactorizationSummary,
}

impl MultilevelFactorization {
    /// Run levels until one block remains, the reduced dimension is zero, or
    /// `config.max_levels` is reached.
    pub fn factorize(
        mut matrix: SparseBlockMatrix,
        mut close: CloseBlocks,
        config: &CeConfig,
    ) -> CeResult<Self> {
        config.validate()?;
        if close.len() != matrix.num_blocks() {
            return Err(CeError::InvalidInput(format!(
                "Close sets cover {} rows, matrix has {} block indices",
                close.len(),
                matrix.num_blocks()
            )));
        }
        matrix.validate_shapes()?;

        let start = Instant::now();
        let initial_dimension = matrix.dimension();
        let mut levels = Vec::new();
        let mut summaries = Vec::new();

        loop {
            let level = levels.len();
            let num_blocks = matrix.num_blocks();
            let dimension = matrix.dimension();

            let factors = run_level(&mut matrix, &mut close, config, level)?;
            let summary = LevelSummary {
                level,
                num_blocks,
                dimension,
                retained: factors.retained(),
                nnz_blocks: matrix.nnz_blocks(),
            };
            info!(
                "Level {}: {} blocks, dimension {} -> {} (ratio {:.3})",
                level,
                num_blocks,
                dimension,
                summary.retained,
                summary.compression_ratio()
            );
            levels.push(factors);
            summaries.push(summary);

            let done = matrix.num_blocks() <= 1
                || matrix.dimension() == 0
                || config.max_levels.is_some_and(|max| levels.len() >= max);
            if done {
                break;
            }
            let (coarse, coarse_close) = coarsen(&matrix, config.coarsen_step)?;
            matrix = coarse;
            close = coarse_close;
        }

        let summary = FactorizationSummary {
            levels: summaries,
            initial_dimension,
            final_dimension: matrix.dimension(),
            total_time: start.elapsed(),
        };
        Ok(Self {
            levels,
            reduced: matrix,
            summary,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}
