//! Verification of decompositions.

use crate::{
    block::Block,
    error::{DecompositionError, Result},
    grid::{GridPoint, GridWindow, VoxelRegion},
    mask::BoolGrid,
    scan,
};

/// Checks that the given blocks cover every cell of the region exactly once
/// and that each block holds a single tag matching the region's content.
///
/// Blocks are located by their position in the backing grid, so the blocks
/// may come from decompositions of several disjoint partitions of the
/// region. Each block's offset must place the partition it was found in at a
/// cell inside the region.
///
/// # Errors
/// Returns [`DecompositionError::Validation`] describing the first problem
/// found, which may be an empty block, a block whose offset does not fit its
/// position in the region, a block extending outside the region, a block
/// containing other tags than its own, two overlapping blocks or a cell
/// covered by no block.
pub fn validate_decomposition(region: &VoxelRegion<'_>, blocks: &[Block]) -> Result<()> {
    let shape = region.shape();
    let mut coverage = BoolGrid::for_region(region);

    for (block_idx, block) in blocks.iter().enumerate() {
        if block.shape().is_empty() {
            return Err(invalid(format!("block {block_idx} ({block}) is empty")));
        }

        let Some(origin_in_region) = block.origin().checked_offset_from(region.origin()) else {
            return Err(invalid(format!(
                "block {block_idx} ({block}) lies outside region {}",
                region.window()
            )));
        };
        let partition_origin_in_region = origin_in_region.checked_offset_from(block.offset());
        if !partition_origin_in_region.is_some_and(|origin| shape.contains(origin)) {
            return Err(invalid(format!(
                "block {block_idx} ({block}) has offset {} inconsistent with its position in \
                 region {}",
                block.offset(),
                region.window()
            )));
        }

        let window = GridWindow::new(origin_in_region, block.shape());
        if !window.fits_within(shape) {
            return Err(invalid(format!(
                "block {block_idx} ({block}) extends outside region of shape {shape}"
            )));
        }

        for z in window.z_range() {
            for y in window.y_range() {
                if !scan::row_is_all_tag(region, z, y, window.x_range(), block.tag())? {
                    return Err(invalid(format!(
                        "block {block_idx} ({block}) contains other tags at local z = {z}, y = {y}"
                    )));
                }
            }
        }

        let n_newly_covered =
            coverage.set_box(window.z_range(), window.y_range(), window.x_range())?;
        if n_newly_covered != block.volume() {
            return Err(invalid(format!(
                "block {block_idx} ({block}) overlaps an earlier block"
            )));
        }
    }

    if let Some(gap) = coverage.first_unset_from(GridPoint::ORIGIN)? {
        return Err(invalid(format!(
            "cell {} is not covered by any block",
            region.to_world(gap)
        )));
    }

    Ok(())
}

fn invalid(reason: String) -> DecompositionError {
    DecompositionError::Validation(reason)
}
