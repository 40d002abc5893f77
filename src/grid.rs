//! Voxel grids and bounds-checked windows into them.
//!
//! All 3D indexing in the crate goes through a [`WindowLayout`], which
//! describes a rectangular window (origin and shape) into a flat backing
//! buffer laid out so that the linear index varies fastest with x, then y,
//! then z: `index = (z * height + y) * width + x`.

use crate::{
    error::{DecompositionError, Result},
    tag::Tag,
};
use serde::{Deserialize, Serialize};
use std::{fmt, ops::Range};

/// Indices of a cell in a 3D grid, in (z, y, x) order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPoint {
    pub z: usize,
    pub y: usize,
    pub x: usize,
}

/// Number of cells along each axis of a 3D grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    pub depth: usize,
    pub height: usize,
    pub width: usize,
}

/// A rectangular window of cells, given by the indices of its lowest corner
/// and its shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridWindow {
    pub origin: GridPoint,
    pub shape: GridShape,
}

/// Descriptor for a window into a flat buffer holding a full backing grid.
/// Every access is checked against the window's shape before being mapped to
/// a linear index in the backing buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowLayout {
    window: GridWindow,
    row_stride: usize,
    slice_stride: usize,
}

/// A 3D grid of voxel tags stored in a single flat buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoxelGrid {
    shape: GridShape,
    tags: Vec<u8>,
}

/// A read-only view of a rectangular window of a [`VoxelGrid`]. Cells are
/// addressed with indices local to the window.
#[derive(Clone, Copy, Debug)]
pub struct VoxelRegion<'a> {
    tags: &'a [u8],
    layout: WindowLayout,
}

impl GridPoint {
    pub const ORIGIN: Self = Self::new(0, 0, 0);

    pub const fn new(z: usize, y: usize, x: usize) -> Self {
        Self { z, y, x }
    }

    /// Returns the point displaced by the given point's components.
    pub const fn offset_by(self, offset: Self) -> Self {
        Self::new(self.z + offset.z, self.y + offset.y, self.x + offset.x)
    }

    /// Returns the displacement from `base` to this point, or [`None`] if
    /// the point lies below `base` along any axis.
    pub fn checked_offset_from(self, base: Self) -> Option<Self> {
        Some(Self::new(
            self.z.checked_sub(base.z)?,
            self.y.checked_sub(base.y)?,
            self.x.checked_sub(base.x)?,
        ))
    }
}

impl fmt::Display for GridPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(z = {}, y = {}, x = {})", self.z, self.y, self.x)
    }
}

impl GridShape {
    pub const fn new(depth: usize, height: usize, width: usize) -> Self {
        Self {
            depth,
            height,
            width,
        }
    }

    /// Returns the total number of cells. Only shapes whose volume is known
    /// to fit, such as those of existing grids, should be queried.
    pub const fn volume(&self) -> usize {
        self.depth * self.height * self.width
    }

    /// Returns the total number of cells, or [`None`] if it overflows.
    pub fn checked_volume(&self) -> Option<usize> {
        self.depth.checked_mul(self.height)?.checked_mul(self.width)
    }

    /// Whether the shape holds no cells.
    pub const fn is_empty(&self) -> bool {
        self.depth == 0 || self.height == 0 || self.width == 0
    }

    /// Whether the given local indices lie inside the shape.
    pub const fn contains(&self, point: GridPoint) -> bool {
        point.z < self.depth && point.y < self.height && point.x < self.width
    }
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.depth, self.height, self.width)
    }
}

impl GridWindow {
    pub const fn new(origin: GridPoint, shape: GridShape) -> Self {
        Self { origin, shape }
    }

    /// Creates a window covering the whole of a grid with the given shape.
    pub const fn covering(shape: GridShape) -> Self {
        Self::new(GridPoint::ORIGIN, shape)
    }

    /// Returns the exclusive upper corner of the window, or [`None`] if it
    /// overflows.
    pub fn checked_end(&self) -> Option<GridPoint> {
        Some(GridPoint::new(
            self.origin.z.checked_add(self.shape.depth)?,
            self.origin.y.checked_add(self.shape.height)?,
            self.origin.x.checked_add(self.shape.width)?,
        ))
    }

    pub fn z_range(&self) -> Range<usize> {
        self.origin.z..self.origin.z + self.shape.depth
    }

    pub fn y_range(&self) -> Range<usize> {
        self.origin.y..self.origin.y + self.shape.height
    }

    pub fn x_range(&self) -> Range<usize> {
        self.origin.x..self.origin.x + self.shape.width
    }

    /// Whether the window lies completely inside a grid with the given shape.
    pub fn fits_within(&self, bounds: GridShape) -> bool {
        self.checked_end().is_some_and(|end| {
            end.z <= bounds.depth && end.y <= bounds.height && end.x <= bounds.width
        })
    }

    /// Whether the two windows share at least one cell.
    pub fn overlaps(&self, other: &Self) -> bool {
        if self.shape.is_empty() || other.shape.is_empty() {
            return false;
        }
        let overlap_along = |start_a: usize, len_a: usize, start_b: usize, len_b: usize| {
            start_a < start_b.saturating_add(len_b) && start_b < start_a.saturating_add(len_a)
        };
        overlap_along(
            self.origin.z,
            self.shape.depth,
            other.origin.z,
            other.shape.depth,
        ) && overlap_along(
            self.origin.y,
            self.shape.height,
            other.origin.y,
            other.shape.height,
        ) && overlap_along(
            self.origin.x,
            self.shape.width,
            other.origin.x,
            other.shape.width,
        )
    }
}

impl fmt::Display for GridWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.shape, self.origin)
    }
}

impl WindowLayout {
    /// Creates a layout for the given window into a backing grid with the
    /// given shape.
    ///
    /// # Errors
    /// Returns [`DecompositionError::WindowOutOfRange`] if the window does
    /// not fit inside the backing grid.
    pub fn new(window: GridWindow, backing_shape: GridShape) -> Result<Self> {
        if !window.fits_within(backing_shape) {
            return Err(DecompositionError::WindowOutOfRange {
                origin: window.origin,
                shape: window.shape,
                bounds: backing_shape,
            });
        }
        Ok(Self {
            window,
            row_stride: backing_shape.width,
            slice_stride: backing_shape.height * backing_shape.width,
        })
    }

    /// Creates a layout for a window covering a whole backing grid.
    pub const fn covering(shape: GridShape) -> Self {
        Self {
            window: GridWindow::covering(shape),
            row_stride: shape.width,
            slice_stride: shape.height * shape.width,
        }
    }

    pub fn window(&self) -> &GridWindow {
        &self.window
    }

    pub fn origin(&self) -> GridPoint {
        self.window.origin
    }

    pub fn shape(&self) -> GridShape {
        self.window.shape
    }

    /// Returns the index in the backing buffer of the cell with the given
    /// window-local indices.
    ///
    /// # Errors
    /// Returns [`DecompositionError::CellOutOfRange`] if the indices are
    /// outside the window.
    pub fn linear_idx(&self, z: usize, y: usize, x: usize) -> Result<usize> {
        let point = GridPoint::new(z, y, x);
        if !self.window.shape.contains(point) {
            return Err(DecompositionError::CellOutOfRange {
                point,
                shape: self.window.shape,
            });
        }
        Ok(self.row_start_idx(z, y) + x)
    }

    /// Returns the range of indices in the backing buffer covered by the
    /// given segment of a row in the window.
    ///
    /// # Errors
    /// Returns [`DecompositionError::RowOutOfRange`] if the row or any part
    /// of the segment is outside the window.
    pub fn row_range(&self, z: usize, y: usize, x_range: Range<usize>) -> Result<Range<usize>> {
        let shape = self.window.shape;
        if z >= shape.depth
            || y >= shape.height
            || x_range.start > x_range.end
            || x_range.end > shape.width
        {
            return Err(DecompositionError::RowOutOfRange {
                z,
                y,
                x_start: x_range.start,
                x_end: x_range.end,
                shape,
            });
        }
        let row_start = self.row_start_idx(z, y);
        Ok(row_start + x_range.start..row_start + x_range.end)
    }

    fn row_start_idx(&self, z: usize, y: usize) -> usize {
        let origin = self.window.origin;
        (origin.z + z) * self.slice_stride + (origin.y + y) * self.row_stride + origin.x
    }
}

impl VoxelGrid {
    /// Creates a grid with the given shape from a flat buffer of tag bytes.
    ///
    /// # Errors
    /// Returns an error if the number of tags does not match the shape (which
    /// includes shapes whose volume overflows) or if any tag is the reserved
    /// zero byte.
    pub fn from_tags(shape: GridShape, tags: Vec<u8>) -> Result<Self> {
        if shape.checked_volume() != Some(tags.len()) {
            return Err(DecompositionError::ShapeMismatch {
                n_tags: tags.len(),
                shape,
            });
        }
        if tags.contains(&0) {
            return Err(DecompositionError::ReservedTag('\0'));
        }
        Ok(Self { shape, tags })
    }

    /// Creates a grid with the given shape, obtaining the tag of each cell
    /// from the given closure.
    ///
    /// # Errors
    /// Returns [`DecompositionError::ReservedTag`] if the closure produces
    /// [`Tag::NONE`], or [`DecompositionError::ShapeTooLarge`] if the volume
    /// of the shape overflows.
    pub fn from_fn(shape: GridShape, mut tag_at: impl FnMut(GridPoint) -> Tag) -> Result<Self> {
        let volume = shape
            .checked_volume()
            .ok_or(DecompositionError::ShapeTooLarge(shape))?;
        let mut tags = Vec::with_capacity(volume);
        for z in 0..shape.depth {
            for y in 0..shape.height {
                for x in 0..shape.width {
                    tags.push(tag_at(GridPoint::new(z, y, x)).byte());
                }
            }
        }
        Self::from_tags(shape, tags)
    }

    /// Creates a grid with every cell holding the given tag.
    ///
    /// # Errors
    /// Returns [`DecompositionError::ReservedTag`] if the tag is
    /// [`Tag::NONE`], or [`DecompositionError::ShapeTooLarge`] if the volume
    /// of the shape overflows.
    pub fn filled(shape: GridShape, tag: Tag) -> Result<Self> {
        let volume = shape
            .checked_volume()
            .ok_or(DecompositionError::ShapeTooLarge(shape))?;
        Self::from_tags(shape, vec![tag.byte(); volume])
    }

    /// Parses a grid from text where each line holds one row of tag
    /// characters along x, consecutive lines are rows along y, and z-slices
    /// are separated by one or more whitespace-only lines.
    ///
    /// # Errors
    /// Returns [`DecompositionError::GridSyntax`] if rows or slices have
    /// differing sizes or a character is not a valid tag.
    pub fn parse_slices(text: &str) -> Result<Self> {
        let mut tags = Vec::new();
        let mut width = None;
        let mut height = None;
        let mut depth = 0;
        let mut rows_in_slice = 0;

        for (line_idx, line) in text.lines().enumerate() {
            let line_number = line_idx + 1;

            if line.trim().is_empty() {
                if rows_in_slice > 0 {
                    end_slice(&mut height, &mut depth, rows_in_slice, line_number)?;
                    rows_in_slice = 0;
                }
                continue;
            }

            let row_start = tags.len();
            for character in line.chars() {
                let tag =
                    Tag::from_char(character).map_err(|_reserved| DecompositionError::GridSyntax {
                        line: line_number,
                        reason: format!("{character:?} is not a valid tag"),
                    })?;
                tags.push(tag.byte());
            }
            let row_width = tags.len() - row_start;

            match width {
                None => width = Some(row_width),
                Some(expected) if expected != row_width => {
                    return Err(DecompositionError::GridSyntax {
                        line: line_number,
                        reason: format!("row has {row_width} cells, expected {expected}"),
                    });
                }
                Some(_) => {}
            }
            rows_in_slice += 1;
        }

        if rows_in_slice > 0 {
            end_slice(
                &mut height,
                &mut depth,
                rows_in_slice,
                text.lines().count(),
            )?;
        }

        let shape = GridShape::new(depth, height.unwrap_or(0), width.unwrap_or(0));
        Self::from_tags(shape, tags)
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    /// Returns the flat buffer of tag bytes.
    pub fn tags(&self) -> &[u8] {
        &self.tags
    }

    /// Returns a read-only view of the given window of the grid.
    ///
    /// # Errors
    /// Returns [`DecompositionError::WindowOutOfRange`] if the window does
    /// not fit inside the grid.
    pub fn region(&self, window: GridWindow) -> Result<VoxelRegion<'_>> {
        VoxelRegion::new(self, window)
    }

    /// Returns a read-only view of the whole grid.
    pub fn whole_region(&self) -> VoxelRegion<'_> {
        VoxelRegion {
            tags: &self.tags,
            layout: WindowLayout::covering(self.shape),
        }
    }
}

fn end_slice(
    height: &mut Option<usize>,
    depth: &mut usize,
    rows_in_slice: usize,
    line_number: usize,
) -> Result<()> {
    match *height {
        None => *height = Some(rows_in_slice),
        Some(expected) if expected != rows_in_slice => {
            return Err(DecompositionError::GridSyntax {
                line: line_number,
                reason: format!("slice has {rows_in_slice} rows, expected {expected}"),
            });
        }
        Some(_) => {}
    }
    *depth += 1;
    Ok(())
}

impl<'a> VoxelRegion<'a> {
    /// Creates a view of the given window of the grid.
    ///
    /// # Errors
    /// Returns [`DecompositionError::WindowOutOfRange`] if the window does
    /// not fit inside the grid.
    pub fn new(grid: &'a VoxelGrid, window: GridWindow) -> Result<Self> {
        Ok(Self {
            tags: &grid.tags,
            layout: WindowLayout::new(window, grid.shape)?,
        })
    }

    /// Returns the window of the backing grid covered by the region.
    pub fn window(&self) -> &GridWindow {
        self.layout.window()
    }

    /// Returns the indices of the region's lowest corner in the backing grid.
    pub fn origin(&self) -> GridPoint {
        self.layout.origin()
    }

    pub fn shape(&self) -> GridShape {
        self.layout.shape()
    }

    /// Converts region-local indices into indices in the backing grid.
    pub fn to_world(&self, local: GridPoint) -> GridPoint {
        self.origin().offset_by(local)
    }

    /// Returns the tag at the given region-local indices.
    ///
    /// # Errors
    /// Returns [`DecompositionError::CellOutOfRange`] if the indices are
    /// outside the region.
    pub fn at(&self, z: usize, y: usize, x: usize) -> Result<Tag> {
        let idx = self.layout.linear_idx(z, y, x)?;
        Ok(Tag::from_byte(self.tags[idx]))
    }

    /// Returns the tag bytes of the given segment of a row in the region.
    ///
    /// # Errors
    /// Returns [`DecompositionError::RowOutOfRange`] if any part of the
    /// segment is outside the region.
    pub fn row(&self, z: usize, y: usize, x_range: Range<usize>) -> Result<&'a [u8]> {
        let range = self.layout.row_range(z, y, x_range)?;
        Ok(&self.tags[range])
    }
}
