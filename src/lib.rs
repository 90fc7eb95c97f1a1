//! Multilevel compress-then-eliminate direct solver kernel for sparse block
//! matrices.
//!
//! A sparse matrix is split into dense blocks ([`partition`]). Each level then
//! visits every block index: interactions with far blocks are compressed to
//! their numerical rank by an orthogonal change of basis
//! ([`linalg::compress`]), and the coordinates that carry no far interaction
//! are eliminated with a block LU step whose Schur complement only touches
//! close blocks ([`linalg::eliminate`]). Blocks are merged between levels
//! ([`solver::coarsen`]) until one block remains.

pub mod block;
pub mod error;
pub mod generate;
pub mod linalg;
pub mod logger;
pub mod partition;
pub mod solver;

pub use block::{BlockEntry, CloseBlocks, SparseBlockMatrix};
pub use error::{CeError, CeResult};
pub use logger::{init_logger, init_logger_with_level};
pub use partition::{BfsPartitioner, BlockPartition, GraphPartitioner, make_dense_blocks};
pub use solver::{CeConfig, MultilevelFactorization};
