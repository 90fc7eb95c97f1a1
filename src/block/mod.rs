//! Sparse block matrix storage.
//!
//! A [`SparseBlockMatrix`] maps `(row_block, col_block)` pairs to dense
//! `nalgebra` blocks. A missing key means the block is exactly zero, and the
//! container never stores an all-zero block: every mutation site in the
//! compressor, eliminator and partitioner finishes with
//! [`SparseBlockMatrix::prune_zero_block`].
//!
//! Lookups go through [`BlockEntry`], which distinguishes a stored block from
//! a structural zero of known shape.

pub mod dense;

pub use dense::{apply_permutation, block_offsets, blocks_to_full_matrix, inverse_permutation};

use crate::error::{CeError, CeResult};
use nalgebra::DMatrix;
use std::collections::{BTreeMap, BTreeSet};

/// Dense block type stored in the sparse block matrix
pub type Block = DMatrix<f64>;

/// Returns true if every entry of the block is exactly zero.
///
/// Blocks with a zero dimension are considered zero.
pub fn is_zero_block(block: &Block) -> bool {
    block.iter().all(|&v| v == 0.0)
}

/// Result of looking up a block position
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockEntry<'a> {
    /// A stored, potentially nonzero block
    Present(&'a Block),
    /// Nothing stored: the block is the exact zero matrix of this shape
    StructuralZero { rows: usize, cols: usize },
}

impl<'a> BlockEntry<'a> {
    pub fn is_present(&self) -> bool {
        matches!(self, BlockEntry::Present(_))
    }

    pub fn present(&self) -> Option<&'a Block> {
        match self {
            BlockEntry::Present(block) => Some(block),
            BlockEntry::StructuralZero { .. } => None,
        }
    }

    /// Shape of the entry as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        match self {
            BlockEntry::Present(block) => block.shape(),
            BlockEntry::StructuralZero { rows, cols } => (*rows, *cols),
        }
    }

    /// Materialize the entry as an owned dense block
    pub fn to_dense(&self) -> Block {
        match self {
            BlockEntry::Present(block) => (*block).clone(),
            BlockEntry::StructuralZero { rows, cols } => Block::zeros(*rows, *cols),
        }
    }
}

/// Per-row sets of column indices declared algebraically near.
///
/// Blocks listed here are excluded from low-rank compression. Compression and
/// elimination only ever remove entries (through zero pruning).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseBlocks {
    sets: Vec<BTreeSet<usize>>,
}

impl CloseBlocks {
    /// Empty close sets for `num_blocks` rows
    pub fn new(num_blocks: usize) -> Self {
        Self {
            sets: vec![BTreeSet::new(); num_blocks],
        }
    }

    /// Close sets equal to the full nonzero structure of `matrix`
    pub fn from_structure(matrix: &SparseBlockMatrix) -> Self {
        let mut close = Self::new(matrix.num_blocks());
        for (line, col) in matrix.structure() {
            close.insert(line, col);
        }
        close
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Close columns of row `line`
    pub fn row(&self, line: usize) -> &BTreeSet<usize> {
        &self.sets[line]
    }

    pub fn contains(&self, line: usize, col: usize) -> bool {
        self.sets.get(line).is_some_and(|set| set.contains(&col))
    }

    pub fn insert(&mut self, line: usize, col: usize) -> bool {
        self.sets[line].insert(col)
    }

    pub fn remove(&mut self, line: usize, col: usize) -> bool {
        self.sets
            .get_mut(line)
            .is_some_and(|set| set.remove(&col))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BTreeSet<usize>> {
        self.sets.iter()
    }
}

/// Off-diagonal neighbours of a block index, captured before compression
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Neighbors {
    /// Columns `c != iter` with block `(iter, c)` present
    pub row: Vec<usize>,
    /// Rows `l != iter` with block `(l, iter)` present
    pub col: Vec<usize>,
}

impl Neighbors {
    pub fn is_empty(&self) -> bool {
        self.row.is_empty() && self.col.is_empty()
    }
}

/// Square block-sparse matrix with an enforced "no stored zero block" invariant
#[derive(Debug, Clone, PartialEq)]
pub struct SparseBlockMatrix {
    blocks: BTreeMap<(usize, usize), Block>,
    /// For every column block, the rows holding a stored block
    columns: Vec<BTreeSet<usize>>,
    block_sizes: Vec<usize>,
}

impl SparseBlockMatrix {
    /// Create an all-zero block matrix with the given block sizes
    pub fn new(block_sizes: Vec<usize>) -> Self {
        Self {
            blocks: BTreeMap::new(),
            columns: vec![BTreeSet::new(); block_sizes.len()],
            block_sizes,
        }
    }

    /// Number of block rows (and block columns)
    pub fn num_blocks(&self) -> usize {
        self.block_sizes.len()
    }

    /// Scalar dimension of the matrix
    pub fn dimension(&self) -> usize {
        self.block_sizes.iter().sum()
    }

    pub fn block_sizes(&self) -> &[usize] {
        &self.block_sizes
    }

    pub fn block_size(&self, index: usize) -> usize {
        self.block_sizes[index]
    }

    /// Number of stored (nonzero) blocks
    pub fn nnz_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Look up block `(line, col)`
    pub fn get(&self, line: usize, col: usize) -> BlockEntry<'_> {
        match self.blocks.get(&(line, col)) {
            Some(block) => BlockEntry::Present(block),
            None => BlockEntry::StructuralZero {
                rows: self.block_sizes[line],
                cols: self.block_sizes[col],
            },
        }
    }

    /// Coordinates of all stored blocks in row-major order
    pub fn structure(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.blocks.keys().copied()
    }

    /// Stored blocks in row-major order
    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), &Block)> {
        self.blocks.iter().map(|(&key, block)| (key, block))
    }

    /// Store `block` at `(line, col)` after checking its shape.
    ///
    /// An all-zero block clears the position instead of being stored. Returns
    /// whether a block is stored afterwards.
    pub fn insert(&mut self, line: usize, col: usize, block: Block) -> CeResult<bool> {
        let n = self.num_blocks();
        if line >= n || col >= n {
            return Err(CeError::InvalidInput(format!(
                "Block ({line}, {col}) out of range for {n} block indices"
            )));
        }
        let expected = (self.block_sizes[line], self.block_sizes[col]);
        if block.shape() != expected {
            return Err(CeError::ShapeMismatch {
                row: line,
                col,
                expected,
                found: block.shape(),
            });
        }
        if is_zero_block(&block) {
            self.remove_block(line, col);
            return Ok(false);
        }
        self.set_block(line, col, block);
        Ok(true)
    }

    /// Off-diagonal neighbours of block index `iter`
    pub fn neighbors(&self, iter: usize) -> Neighbors {
        let row = self
            .blocks
            .range((iter, 0)..(iter + 1, 0))
            .map(|(&(_, col), _)| col)
            .filter(|&col| col != iter)
            .collect();
        let col = self.columns[iter]
            .iter()
            .copied()
            .filter(|&line| line != iter)
            .collect();
        Neighbors { row, col }
    }

    /// Delete block `(line, col)` if it is stored and exactly zero.
    ///
    /// When a block is removed, `col` is also dropped from `close[line]`.
    /// Returns whether a block was removed.
    pub fn prune_zero_block(&mut self, line: usize, col: usize, close: &mut CloseBlocks) -> bool {
        let is_zero = self.blocks.get(&(line, col)).is_some_and(is_zero_block);
        if is_zero {
            self.remove_block(line, col);
            close.remove(line, col);
        }
        is_zero
    }

    /// Check every stored block against the declared block sizes
    pub fn validate_shapes(&self) -> CeResult<()> {
        for (&(row, col), block) in &self.blocks {
            let expected = (self.block_sizes[row], self.block_sizes[col]);
            if block.shape() != expected {
                return Err(CeError::ShapeMismatch {
                    row,
                    col,
                    expected,
                    found: block.shape(),
                });
            }
        }
        Ok(())
    }

    /// First stored block that is all zero, if any
    pub fn find_zero_block(&self) -> Option<(usize, usize)> {
        self.blocks
            .iter()
            .find(|(_, block)| is_zero_block(block))
            .map(|(&key, _)| key)
    }

    pub(crate) fn block(&self, line: usize, col: usize) -> Option<&Block> {
        self.blocks.get(&(line, col))
    }

    /// Store without shape or zero checks. Callers prune afterwards.
    pub(crate) fn set_block(&mut self, line: usize, col: usize, block: Block) {
        self.columns[col].insert(line);
        self.blocks.insert((line, col), block);
    }

    pub(crate) fn remove_block(&mut self, line: usize, col: usize) -> Option<Block> {
        let removed = self.blocks.remove(&(line, col));
        if removed.is_some() {
            self.columns[col].remove(&line);
        }
        removed
    }

    pub(crate) fn set_block_size(&mut self, index: usize, size: usize) {
        self.block_sizes[index] = size;
    }
}
