//! Error types for the ce-solver library
//!
//! This module provides the main error and result types used throughout the library.
//! Module-specific errors (linear algebra, partitioning) convert into [`CeError`].
//! All errors use the `thiserror` crate for automatic trait implementations.

use crate::{linalg::LinAlgError, partition::PartitionError};
use thiserror::Error;

/// Main result type used throughout the ce-solver library
pub type CeResult<T> = Result<T, CeError>;

/// Main error type for the ce-solver library
///
/// None of these errors is transient. The only recovery at a higher level is to
/// restart with a different block size or compression tolerance.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CeError {
    /// The remainder quadrant of a diagonal block is not invertible
    #[error("Singular remainder block at index {block}: diagonal block is not invertible")]
    SingularRemainder { block: usize },

    /// A stored block disagrees with the declared block sizes
    #[error("Shape mismatch at block ({row}, {col}): expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        row: usize,
        col: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// A permutation does not match the dimension it is applied to
    #[error("Permutation size mismatch: expected {expected}, found {found}")]
    PermutationSizeMismatch { expected: usize, found: usize },

    /// Graph partitioning failures
    #[error("Partition error: {0}")]
    Partition(String),

    /// Linear algebra related errors
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<LinAlgError> for CeError {
    fn from(err: LinAlgError) -> Self {
        match err {
            LinAlgError::SingularRemainder { block } => CeError::SingularRemainder { block },
            LinAlgError::InvalidInput(msg) => CeError::InvalidInput(msg),
            other => CeError::LinearAlgebra(other.to_string()),
        }
    }
}

impl From<PartitionError> for CeError {
    fn from(err: PartitionError) -> Self {
        match err {
            PartitionError::InvalidInput(msg) => CeError::InvalidInput(msg),
            other => CeError::Partition(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ce_error_display() {
        let error = CeError::SingularRemainder { block: 7 };
        assert_eq!(
            error.to_string(),
            "Singular remainder block at index 7: diagonal block is not invertible"
        );
    }

    #[test]
    fn test_shape_mismatch_display() {
        let error = CeError::ShapeMismatch {
            row: 1,
            col: 2,
            expected: (3, 4),
            found: (3, 5),
        };
        assert!(error.to_string().contains("(1, 2)"));
        assert!(error.to_string().contains("(3, 5)"));
    }

    #[test]
    fn test_singular_block_survives_conversion() {
        let err = CeError::from(LinAlgError::SingularRemainder { block: 3 });
        assert_eq!(err, CeError::SingularRemainder { block: 3 });
    }

    #[test]
    fn test_from_partition_error() {
        let err = CeError::from(PartitionError::Partitioner("metis failed".to_string()));
        match err {
            CeError::Partition(msg) => assert!(msg.contains("metis failed")),
            _ => panic!("Expected partition error"),
        }
    }

    #[test]
    fn test_ce_result_err() {
        let result: CeResult<i32> = Err(CeError::InvalidInput("Test error".to_string()));
        assert!(result.is_err());
    }
}
