//! Fast tests over contiguous runs of cells.
//!
//! Rows are compared a lane of [`LANE_WIDTH`] bytes at a time: the bytes of a
//! lane are XOR-ed with the expected value and OR-reduced, which compiles to
//! wide vector instructions, and the scan exits at the first lane holding a
//! mismatch. Runs shorter than a lane, and the tail of longer runs, fall back
//! to a plain scalar scan. Both paths give the same result as comparing byte
//! by byte.

use crate::{
    error::Result,
    grid::VoxelRegion,
    mask::{CompressionMask, UNMARKED},
    tag::Tag,
};
use std::ops::Range;

/// Number of bytes compared per step on the fast path.
pub const LANE_WIDTH: usize = 32;

/// Whether every byte in the slice equals `value`. Vacuously true for an
/// empty slice.
pub fn all_bytes_equal(bytes: &[u8], value: u8) -> bool {
    let mut lanes = bytes.chunks_exact(LANE_WIDTH);
    for lane in &mut lanes {
        if lane_differs(lane, value) {
            return false;
        }
    }
    scalar_leading_run_len(lanes.remainder(), value) == lanes.remainder().len()
}

/// Returns the number of bytes at the start of the slice that equal `value`.
pub fn leading_run_len(bytes: &[u8], value: u8) -> usize {
    let mut lanes = bytes.chunks_exact(LANE_WIDTH);
    let mut run_len = 0;
    for lane in &mut lanes {
        if lane_differs(lane, value) {
            return run_len + scalar_leading_run_len(lane, value);
        }
        run_len += LANE_WIDTH;
    }
    run_len + scalar_leading_run_len(lanes.remainder(), value)
}

/// Whether every cell in the given segment of a row in the region has the
/// given tag.
///
/// # Errors
/// Returns an error if the segment is not inside the region.
pub fn row_is_all_tag(
    region: &VoxelRegion<'_>,
    z: usize,
    y: usize,
    x_range: Range<usize>,
    tag: Tag,
) -> Result<bool> {
    Ok(all_bytes_equal(region.row(z, y, x_range)?, tag.byte()))
}

/// Whether no cell in the given segment of a row in the mask is marked.
///
/// # Errors
/// Returns an error if the segment is not inside the mask.
pub fn row_is_all_unmarked(
    mask: &CompressionMask,
    z: usize,
    y: usize,
    x_range: Range<usize>,
) -> Result<bool> {
    Ok(all_bytes_equal(mask.row(z, y, x_range)?, UNMARKED))
}

/// Returns the length of the run of cells starting at `x_start` on the given
/// row that all have the given tag and are unmarked, capped at `max_len`.
///
/// # Errors
/// Returns an error if the first `max_len` cells from `x_start` are not all
/// inside the region.
pub fn free_run_len(
    region: &VoxelRegion<'_>,
    mask: &CompressionMask,
    z: usize,
    y: usize,
    x_start: usize,
    max_len: usize,
    tag: Tag,
) -> Result<usize> {
    let x_range = x_start..x_start.saturating_add(max_len);

    if row_is_all_tag(region, z, y, x_range.clone(), tag)?
        && row_is_all_unmarked(mask, z, y, x_range.clone())?
    {
        return Ok(max_len);
    }

    let tag_run_len = leading_run_len(region.row(z, y, x_range.clone())?, tag.byte());
    if tag_run_len == 0 {
        return Ok(0);
    }
    let unmarked_run_len = leading_run_len(
        mask.row(z, y, x_range.start..x_range.start + tag_run_len)?,
        UNMARKED,
    );
    Ok(unmarked_run_len)
}

/// Whether every cell in the given box has the given tag and is unmarked.
///
/// # Errors
/// Returns an error if the box is not inside the region and mask.
pub fn box_is_free(
    region: &VoxelRegion<'_>,
    mask: &CompressionMask,
    z_range: Range<usize>,
    y_range: Range<usize>,
    x_range: Range<usize>,
    tag: Tag,
) -> Result<bool> {
    for z in z_range {
        for y in y_range.clone() {
            if !row_is_all_tag(region, z, y, x_range.clone(), tag)?
                || !row_is_all_unmarked(mask, z, y, x_range.clone())?
            {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

#[inline]
fn lane_differs(lane: &[u8], value: u8) -> bool {
    lane.iter().fold(0, |acc, &byte| acc | (byte ^ value)) != 0
}

fn scalar_leading_run_len(bytes: &[u8], value: u8) -> usize {
    bytes
        .iter()
        .position(|&byte| byte != value)
        .unwrap_or(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridPoint, GridShape, GridWindow, VoxelGrid};
    use proptest::prelude::*;

    fn naive_leading_run_len(bytes: &[u8], value: u8) -> usize {
        let mut len = 0;
        while len < bytes.len() && bytes[len] == value {
            len += 1;
        }
        len
    }

    #[test]
    fn empty_runs_are_vacuously_equal() {
        assert!(all_bytes_equal(&[], 7));
        assert_eq!(leading_run_len(&[], 7), 0);
    }

    #[test]
    fn should_detect_mismatch_in_every_position_of_long_row() {
        let len = 3 * LANE_WIDTH + 5;
        for mismatch_idx in 0..len {
            let mut bytes = vec![b'A'; len];
            bytes[mismatch_idx] = b'B';
            assert!(!all_bytes_equal(&bytes, b'A'));
            assert_eq!(leading_run_len(&bytes, b'A'), mismatch_idx);
        }
        assert!(all_bytes_equal(&vec![b'A'; len], b'A'));
        assert_eq!(leading_run_len(&vec![b'A'; len], b'A'), len);
    }

    #[test]
    fn should_not_read_outside_given_row_segment() {
        let grid = VoxelGrid::from_tags(GridShape::new(1, 1, 6), b"BAAAAB".to_vec()).unwrap();
        let region = grid.whole_region();
        let tag = Tag::from_byte(b'A');
        assert!(row_is_all_tag(&region, 0, 0, 1..5, tag).unwrap());
        assert!(!row_is_all_tag(&region, 0, 0, 0..5, tag).unwrap());
        assert!(!row_is_all_tag(&region, 0, 0, 1..6, tag).unwrap());
        assert!(row_is_all_tag(&region, 0, 0, 3..3, Tag::from_byte(b'Z')).unwrap());
    }

    #[test]
    fn should_test_rows_of_windowed_region() {
        let grid =
            VoxelGrid::from_tags(GridShape::new(1, 2, 4), b"ABBBCCCA".to_vec()).unwrap();
        let window = GridWindow::new(GridPoint::new(0, 0, 1), GridShape::new(1, 2, 2));
        let region = grid.region(window).unwrap();
        assert!(row_is_all_tag(&region, 0, 0, 0..2, Tag::from_byte(b'B')).unwrap());
        assert!(row_is_all_tag(&region, 0, 1, 0..2, Tag::from_byte(b'C')).unwrap());
        assert!(row_is_all_tag(&region, 0, 0, 0..3, Tag::from_byte(b'B')).is_err());
    }

    #[test]
    fn should_test_unmarked_rows() {
        let mut mask = CompressionMask::new(GridShape::new(1, 2, 5)).unwrap();
        mask.mark_range(0..1, 1..2, 2..3).unwrap();
        assert!(row_is_all_unmarked(&mask, 0, 0, 0..5).unwrap());
        assert!(row_is_all_unmarked(&mask, 0, 1, 0..2).unwrap());
        assert!(row_is_all_unmarked(&mask, 0, 1, 3..5).unwrap());
        assert!(!row_is_all_unmarked(&mask, 0, 1, 0..5).unwrap());
        assert!(row_is_all_unmarked(&mask, 0, 1, 2..2).unwrap());
    }

    #[test]
    fn free_run_should_stop_at_other_tag_or_marked_cell() {
        let grid = VoxelGrid::from_tags(GridShape::new(1, 1, 8), b"AAAAABAA".to_vec()).unwrap();
        let region = grid.whole_region();
        let mut mask = CompressionMask::new(grid.shape()).unwrap();
        let tag = Tag::from_byte(b'A');

        assert_eq!(free_run_len(&region, &mask, 0, 0, 0, 8, tag).unwrap(), 5);
        assert_eq!(free_run_len(&region, &mask, 0, 0, 0, 3, tag).unwrap(), 3);
        assert_eq!(free_run_len(&region, &mask, 0, 0, 6, 2, tag).unwrap(), 2);
        assert_eq!(free_run_len(&region, &mask, 0, 0, 5, 3, tag).unwrap(), 0);

        mask.mark_range(0..1, 0..1, 2..3).unwrap();
        assert_eq!(free_run_len(&region, &mask, 0, 0, 0, 8, tag).unwrap(), 2);
        assert_eq!(free_run_len(&region, &mask, 0, 0, 2, 3, tag).unwrap(), 0);
        assert!(free_run_len(&region, &mask, 0, 0, 6, 3, tag).is_err());
    }

    #[test]
    fn should_test_whole_boxes() {
        let grid = VoxelGrid::filled(GridShape::new(2, 2, 2), Tag::from_byte(b'A')).unwrap();
        let region = grid.whole_region();
        let mut mask = CompressionMask::new(grid.shape()).unwrap();
        let tag = Tag::from_byte(b'A');
        assert!(box_is_free(&region, &mask, 0..2, 0..2, 0..2, tag).unwrap());
        mask.mark_range(1..2, 1..2, 1..2).unwrap();
        assert!(!box_is_free(&region, &mask, 0..2, 0..2, 0..2, tag).unwrap());
        assert!(box_is_free(&region, &mask, 0..1, 0..2, 0..2, tag).unwrap());
        assert!(!box_is_free(&region, &mask, 0..1, 0..1, 0..1, Tag::from_byte(b'B')).unwrap());
    }

    proptest! {
        #[test]
        fn lane_scan_should_agree_with_naive_scan(
            bytes in prop::collection::vec(prop::sample::select(vec![0u8, 1, b'A']), 0..200),
            value in prop::sample::select(vec![0u8, 1, b'A']),
        ) {
            let expected_run_len = naive_leading_run_len(&bytes, value);
            prop_assert_eq!(leading_run_len(&bytes, value), expected_run_len);
            prop_assert_eq!(all_bytes_equal(&bytes, value), expected_run_len == bytes.len());
        }
    }

    proptest! {
        #[test]
        fn long_uniform_prefix_should_be_measured_exactly(
            prefix_len in 0usize..300,
            suffix in prop::collection::vec(any::<u8>(), 0..40),
        ) {
            let mut bytes = vec![b'X'; prefix_len];
            bytes.extend_from_slice(&suffix);
            prop_assert_eq!(
                leading_run_len(&bytes, b'X'),
                naive_leading_run_len(&bytes, b'X')
            );
        }
    }
}
