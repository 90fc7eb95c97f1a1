//! Partitioning of a raw sparse matrix into dense blocks.
//!
//! The scalar sparsity pattern is turned into an undirected graph, split into
//! balanced parts by a [`GraphPartitioner`], and every part becomes one block
//! index. The result carries the permutation that groups the scalar indices
//! by block, so the block form can be checked against the input exactly.

pub mod graph;
#[cfg(feature = "metis")]
pub mod metis;

pub use graph::{AdjacencyGraph, BfsPartitioner, GraphPartitioner};
#[cfg(feature = "metis")]
pub use self::metis::MetisPartitioner;

use crate::block::{Block, CloseBlocks, SparseBlockMatrix};
use crate::linalg::{SparseMatrix, conversions};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Partitioning specific error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PartitionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The graph partitioner failed or returned an unusable assignment
    #[error("Graph partitioner failed: {0}")]
    Partitioner(String),
}

pub type PartitionResult<T> = Result<T, PartitionError>;

/// Block form of a sparse matrix
#[derive(Debug, Clone)]
pub struct BlockPartition {
    /// Scalar indices grouped by block: position `k` of the block form holds
    /// original index `permutation[k]`
    pub permutation: Vec<usize>,
    pub matrix: SparseBlockMatrix,
    /// Exactly the nonzero block structure of `matrix`
    pub close_blocks: CloseBlocks,
}

impl BlockPartition {
    pub fn num_blocks(&self) -> usize {
        self.matrix.num_blocks()
    }

    pub fn block_sizes(&self) -> &[usize] {
        self.matrix.block_sizes()
    }
}

/// Number of parts requested for `n` scalar indices and target block size
pub fn target_parts(n: usize, block_size: usize) -> usize {
    (n / block_size).max(2)
}

/// Split `matrix` into blocks of roughly `block_size` scalar indices.
pub fn make_dense_blocks(
    matrix: &SparseMatrix,
    block_size: usize,
    partitioner: &dyn GraphPartitioner,
) -> PartitionResult<BlockPartition> {
    let n = matrix.nrows();
    if matrix.ncols() != n {
        return Err(PartitionError::InvalidInput(format!(
            "Matrix must be square, got {}x{}",
            n,
            matrix.ncols()
        )));
    }
    if n == 0 {
        return Err(PartitionError::InvalidInput("Matrix is empty".to_string()));
    }
    if block_size == 0 {
        return Err(PartitionError::InvalidInput(
            "Block size must be positive".to_string(),
        ));
    }

    let mut entries = Vec::new();
    conversions::for_each_entry(matrix, |row, col, value| entries.push((row, col, value)));

    let graph = AdjacencyGraph::from_edges(n, entries.iter().map(|&(r, c, _)| (r, c)))?;
    let nparts = target_parts(n, block_size);
    let assignment = partitioner.partition(&graph, nparts)?;
    validate_assignment(&assignment, n, nparts)?;
    debug!(
        "{} partitioner: {} nodes, {} edges, {} parts, edge cut {}",
        partitioner.name(),
        n,
        graph.num_edges(),
        nparts,
        graph.edge_cut(&assignment)
    );

    // Members of each part in ascending node order
    let mut parts: Vec<Vec<usize>> = vec![Vec::new(); nparts];
    for (node, &part) in assignment.iter().enumerate() {
        parts[part].push(node);
    }
    let mut position = vec![0; n];
    for members in &parts {
        for (offset, &node) in members.iter().enumerate() {
            position[node] = offset;
        }
    }
    let block_sizes: Vec<usize> = parts.iter().map(Vec::len).collect();
    let permutation: Vec<usize> = parts.concat();

    // Both orientations of every connected part pair are structurally present
    let mut dense: BTreeMap<(usize, usize), Block> = BTreeMap::new();
    for &(r, c, _) in &entries {
        let (pr, pc) = (assignment[r], assignment[c]);
        for key in [(pr, pc), (pc, pr)] {
            dense
                .entry(key)
                .or_insert_with(|| Block::zeros(block_sizes[key.0], block_sizes[key.1]));
        }
    }
    for &(r, c, value) in &entries {
        if let Some(block) = dense.get_mut(&(assignment[r], assignment[c])) {
            block[(position[r], position[c])] += value;
        }
    }

    let mut block_matrix = SparseBlockMatrix::new(block_sizes);
    let mut close = CloseBlocks::new(nparts);
    let keys: Vec<(usize, usize)> = dense.keys().copied().collect();
    for (key, block) in dense {
        block_matrix.set_block(key.0, key.1, block);
        close.insert(key.0, key.1);
    }
    let mut pruned = 0;
    for (line, col) in keys {
        if block_matrix.prune_zero_block(line, col, &mut close) {
            pruned += 1;
        }
    }

    info!(
        "Partitioned {} indices into {} blocks ({} nonzero blocks, {} zero blocks pruned)",
        n,
        nparts,
        block_matrix.nnz_blocks(),
        pruned
    );

    Ok(BlockPartition {
        permutation,
        matrix: block_matrix,
        close_blocks: close,
    })
}

/// Convenience wrapper building the sparse input from COO triplets.
///
/// Duplicate triplets are summed.
pub fn make_dense_blocks_from_triplets(
    n: usize,
    row_indices: &[usize],
    col_indices: &[usize],
    values: &[f64],
    block_size: usize,
    partitioner: &dyn GraphPartitioner,
) -> PartitionResult<BlockPartition> {
    let matrix = conversions::triplets_to_sparse(n, n, row_indices, col_indices, values)
        .map_err(|e| PartitionError::InvalidInput(e.to_string()))?;
    make_dense_blocks(&matrix, block_size, partitioner)
}

fn validate_assignment(assignment: &[usize], n: usize, nparts: usize) -> PartitionResult<()> {
    if assignment.len() != n {
        return Err(PartitionError::Partitioner(format!(
            "Assignment has {} entries for {} nodes",
            assignment.len(),
            n
        )));
    }
    if let Some((node, &part)) = assignment.iter().enumerate().find(|&(_, &p)| p >= nparts) {
        return Err(PartitionError::Partitioner(format!(
            "Node {node} assigned to part {part}, only {nparts} parts requested"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{apply_permutation, blocks_to_full_matrix, inverse_permutation};
    use crate::linalg::conversions::sparse_to_dense;

    /// Returns a fixed, caller-provided assignment
    struct FixedPartitioner(Vec<usize>);

    impl GraphPartitioner for FixedPartitioner {
        fn partition(&self, _graph: &AdjacencyGraph, _nparts: usize) -> PartitionResult<Vec<usize>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    /// 1D Laplacian with a single long-range coupling between 0 and n-1
    fn tridiagonal(n: usize) -> SparseMatrix {
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        for i in 0..n {
            rows.push(i);
            cols.push(i);
            vals.push(2.0 + i as f64);
            if i + 1 < n {
                rows.extend([i, i + 1]);
                cols.extend([i + 1, i]);
                vals.extend([-1.0, -0.5]);
            }
        }
        rows.push(0);
        cols.push(n - 1);
        vals.push(0.25);
        conversions::triplets_to_sparse(n, n, &rows, &cols, &vals).unwrap()
    }

    #[test]
    fn test_reconstruction_is_exact() {
        let a = tridiagonal(12);
        let partition = make_dense_blocks(&a, 4, &BfsPartitioner::new()).unwrap();

        assert_eq!(partition.num_blocks(), 3);
        assert_eq!(partition.block_sizes().iter().sum::<usize>(), 12);

        let full = blocks_to_full_matrix(&partition.matrix).unwrap();
        let inv = inverse_permutation(&partition.permutation).unwrap();
        let restored = apply_permutation(&full, &inv).unwrap();
        assert_eq!(restored, sparse_to_dense(&a));
    }

    #[test]
    fn test_close_blocks_match_structure() {
        let a = tridiagonal(9);
        let partition = make_dense_blocks(&a, 3, &BfsPartitioner::new()).unwrap();
        assert_eq!(
            partition.close_blocks,
            CloseBlocks::from_structure(&partition.matrix)
        );
        assert!(partition.matrix.find_zero_block().is_none());
        assert!(partition.matrix.validate_shapes().is_ok());
    }

    #[test]
    fn test_fixed_assignment_groups_nodes() {
        // Nodes 0 and 2 in part 0, nodes 1 and 3 in part 1
        let a = tridiagonal(4);
        let partition = make_dense_blocks(&a, 2, &FixedPartitioner(vec![0, 1, 0, 1])).unwrap();
        assert_eq!(partition.permutation, vec![0, 2, 1, 3]);
        assert_eq!(partition.block_sizes(), &[2, 2]);
        // Block (0, 1) row 0 is node 0, column 0 is node 1
        let block = partition.matrix.get(0, 1).present().unwrap().clone();
        assert_eq!(block[(0, 0)], -1.0);
    }

    #[test]
    fn test_one_directional_coupling_leaves_no_zero_mirror() {
        // Only A[0, 1] is stored: the mirrored block (1, 0) must not survive
        let partition = make_dense_blocks_from_triplets(
            2,
            &[0, 1, 0],
            &[0, 1, 1],
            &[1.0, 1.0, 5.0],
            1,
            &FixedPartitioner(vec![0, 1]),
        )
        .unwrap();
        assert!(partition.matrix.get(0, 1).is_present());
        assert!(!partition.matrix.get(1, 0).is_present());
        assert!(!partition.close_blocks.contains(1, 0));
    }

    #[test]
    fn test_explicit_zero_entries_are_pruned() {
        let partition = make_dense_blocks_from_triplets(
            2,
            &[0, 1, 0, 1],
            &[0, 1, 1, 0],
            &[1.0, 1.0, 0.0, 0.0],
            1,
            &FixedPartitioner(vec![0, 1]),
        )
        .unwrap();
        assert_eq!(partition.matrix.nnz_blocks(), 2);
        assert!(!partition.close_blocks.contains(0, 1));
    }

    #[test]
    fn test_duplicate_triplets_accumulate() {
        let partition = make_dense_blocks_from_triplets(
            2,
            &[0, 0, 1],
            &[0, 0, 1],
            &[1.5, 2.5, 1.0],
            1,
            &FixedPartitioner(vec![0, 1]),
        )
        .unwrap();
        let block = partition.matrix.get(0, 0).present().unwrap().clone();
        assert!((block[(0, 0)] - 4.0).abs() < 1e-15);
    }

    #[test]
    fn test_invalid_inputs() {
        let a = tridiagonal(4);
        assert!(matches!(
            make_dense_blocks(&a, 0, &BfsPartitioner::new()),
            Err(PartitionError::InvalidInput(_))
        ));

        let rect = conversions::triplets_to_sparse(2, 3, &[0], &[0], &[1.0]).unwrap();
        assert!(matches!(
            make_dense_blocks(&rect, 1, &BfsPartitioner::new()),
            Err(PartitionError::InvalidInput(_))
        ));

        let empty = conversions::triplets_to_sparse(0, 0, &[], &[], &[]).unwrap();
        assert!(matches!(
            make_dense_blocks(&empty, 1, &BfsPartitioner::new()),
            Err(PartitionError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_bad_assignment_is_rejected() {
        let a = tridiagonal(4);
        assert!(matches!(
            make_dense_blocks(&a, 2, &FixedPartitioner(vec![0, 1])),
            Err(PartitionError::Partitioner(_))
        ));
        assert!(matches!(
            make_dense_blocks(&a, 2, &FixedPartitioner(vec![0, 1, 2, 0])),
            Err(PartitionError::Partitioner(_))
        ));
    }

    #[test]
    fn test_target_parts_has_floor_of_two() {
        assert_eq!(target_parts(3, 10), 2);
        assert_eq!(target_parts(100, 10), 10);
    }
}
