//! Merging of consecutive blocks between levels.

use crate::block::{Block, CloseBlocks, SparseBlockMatrix, block_offsets};
use crate::error::{CeError, CeResult};
use std::collections::BTreeMap;

/// Merge every `step` consecutive block indices into one, in both dimensions.
///
/// The last group may hold fewer than `step` blocks. A merged block is
/// materialized only when at least one constituent is stored. The returned
/// close sets are exactly the nonzero structure of the merged matrix.
pub fn coarsen(matrix: &SparseBlockMatrix, step: usize) -> CeResult<(SparseBlockMatrix, CloseBlocks)> {
    if step == 0 {
        return Err(CeError::InvalidInput(
            "Coarsening step must be positive".to_string(),
        ));
    }
    matrix.validate_shapes()?;

    let sizes = matrix.block_sizes();
    let new_sizes: Vec<usize> = sizes.chunks(step).map(|group| group.iter().sum()).collect();

    // Offset of every old block inside its group
    let inner_offsets: Vec<usize> = sizes
        .chunks(step)
        .flat_map(block_offsets)
        .collect();

    let mut merged: BTreeMap<(usize, usize), Block> = BTreeMap::new();
    for ((line, col), block) in matrix.iter() {
        let key = (line / step, col / step);
        let target = merged
            .entry(key)
            .or_insert_with(|| Block::zeros(new_sizes[key.0], new_sizes[key.1]));
        target
            .view_mut((inner_offsets[line], inner_offsets[col]), block.shape())
            .copy_from(block);
    }

    let mut coarse = SparseBlockMatrix::new(new_sizes);
    for ((line, col), block) in merged {
        coarse.insert(line, col, block)?;
    }
    let close = CloseBlocks::from_structure(&coarse);
    Ok((coarse, close))
}
