//! Boolean grids recording which cells have been claimed.

use crate::{
    error::{DecompositionError, Result},
    grid::{GridPoint, GridShape, GridWindow, VoxelRegion, WindowLayout},
    scan,
};
use std::ops::Range;

/// Byte value of a cell that is not set.
pub const UNMARKED: u8 = 0;
/// Byte value of a cell that is set.
pub const MARKED: u8 = 1;

/// A fixed-shape 3D grid of boolean cells, stored one byte per cell in the
/// same layout as a [`VoxelGrid`](crate::grid::VoxelGrid) so rows can be
/// scanned in bulk.
#[derive(Clone, Debug)]
pub struct BoolGrid {
    layout: WindowLayout,
    cells: Vec<u8>,
}

/// Tracks which cells of a region have already been claimed by an emitted
/// block. All indices are local to the region.
#[derive(Clone, Debug)]
pub struct CompressionMask {
    cells: BoolGrid,
    unmarked_count: usize,
}

impl BoolGrid {
    /// Creates a grid with the given shape where no cell is set.
    ///
    /// # Errors
    /// Returns [`DecompositionError::ShapeTooLarge`] if the volume of the
    /// shape overflows.
    pub fn new(shape: GridShape) -> Result<Self> {
        let volume = shape
            .checked_volume()
            .ok_or(DecompositionError::ShapeTooLarge(shape))?;
        Ok(Self::with_volume(shape, volume))
    }

    /// Creates a grid with the same shape as the given region.
    pub fn for_region(region: &VoxelRegion<'_>) -> Self {
        // A region lies inside a grid, so its volume fits
        let shape = region.shape();
        Self::with_volume(shape, shape.volume())
    }

    fn with_volume(shape: GridShape, volume: usize) -> Self {
        Self {
            layout: WindowLayout::covering(shape),
            cells: vec![UNMARKED; volume],
        }
    }

    pub fn shape(&self) -> GridShape {
        self.layout.shape()
    }

    /// Whether the given cell is set.
    ///
    /// # Errors
    /// Returns [`DecompositionError::CellOutOfRange`] if the cell is outside
    /// the grid.
    pub fn get(&self, z: usize, y: usize, x: usize) -> Result<bool> {
        Ok(self.cells[self.layout.linear_idx(z, y, x)?] != UNMARKED)
    }

    /// Sets the given cell and returns whether it was already set.
    ///
    /// # Errors
    /// Returns [`DecompositionError::CellOutOfRange`] if the cell is outside
    /// the grid.
    pub fn set(&mut self, z: usize, y: usize, x: usize) -> Result<bool> {
        let idx = self.layout.linear_idx(z, y, x)?;
        let was_set = self.cells[idx] != UNMARKED;
        self.cells[idx] = MARKED;
        Ok(was_set)
    }

    /// Returns the cell bytes of the given segment of a row.
    ///
    /// # Errors
    /// Returns [`DecompositionError::RowOutOfRange`] if any part of the
    /// segment is outside the grid.
    pub fn row(&self, z: usize, y: usize, x_range: Range<usize>) -> Result<&[u8]> {
        let range = self.layout.row_range(z, y, x_range)?;
        Ok(&self.cells[range])
    }

    /// Sets every cell in the given box and returns how many of them were not
    /// already set. Nothing is modified if the box is out of range.
    ///
    /// # Errors
    /// Returns [`DecompositionError::WindowOutOfRange`] if the box is not
    /// fully inside the grid.
    pub fn set_box(
        &mut self,
        z_range: Range<usize>,
        y_range: Range<usize>,
        x_range: Range<usize>,
    ) -> Result<usize> {
        self.check_box(&z_range, &y_range, &x_range)?;

        let mut n_newly_set = 0;
        for z in z_range {
            for y in y_range.clone() {
                let range = self.layout.row_range(z, y, x_range.clone())?;
                let row = &mut self.cells[range];
                n_newly_set += row.iter().filter(|&&cell| cell == UNMARKED).count();
                row.fill(MARKED);
            }
        }
        Ok(n_newly_set)
    }

    /// Returns the number of set cells.
    #[cfg(test)]
    fn count_set(&self) -> usize {
        self.cells.iter().filter(|&&cell| cell != UNMARKED).count()
    }

    /// Returns the first cell that is not set, at or after the given cell in
    /// scan order (x fastest, then y, then z).
    ///
    /// # Errors
    /// Propagates row access errors, which can not occur for a start point
    /// inside the grid.
    pub fn first_unset_from(&self, start: GridPoint) -> Result<Option<GridPoint>> {
        let shape = self.shape();
        for z in start.z..shape.depth {
            let y_start = if z == start.z { start.y } else { 0 };
            for y in y_start..shape.height {
                let x_start = if z == start.z && y == start.y {
                    start.x.min(shape.width)
                } else {
                    0
                };
                let row = self.row(z, y, x_start..shape.width)?;
                let n_set = scan::leading_run_len(row, MARKED);
                if n_set < row.len() {
                    return Ok(Some(GridPoint::new(z, y, x_start + n_set)));
                }
            }
        }
        Ok(None)
    }

    fn check_box(
        &self,
        z_range: &Range<usize>,
        y_range: &Range<usize>,
        x_range: &Range<usize>,
    ) -> Result<()> {
        let origin = GridPoint::new(z_range.start, y_range.start, x_range.start);
        let shape = GridShape::new(
            z_range.end.wrapping_sub(z_range.start),
            y_range.end.wrapping_sub(y_range.start),
            x_range.end.wrapping_sub(x_range.start),
        );
        let is_ordered = z_range.start <= z_range.end
            && y_range.start <= y_range.end
            && x_range.start <= x_range.end;

        if !is_ordered || !GridWindow::new(origin, shape).fits_within(self.shape()) {
            return Err(DecompositionError::WindowOutOfRange {
                origin,
                shape,
                bounds: self.shape(),
            });
        }
        Ok(())
    }
}

impl CompressionMask {
    /// Creates a mask with the given shape where no cell is marked.
    ///
    /// # Errors
    /// Returns [`DecompositionError::ShapeTooLarge`] if the volume of the
    /// shape overflows.
    pub fn new(shape: GridShape) -> Result<Self> {
        Ok(Self::from_cells(BoolGrid::new(shape)?))
    }

    /// Creates a mask covering the given region where no cell is marked.
    pub fn for_region(region: &VoxelRegion<'_>) -> Self {
        Self::from_cells(BoolGrid::for_region(region))
    }

    fn from_cells(cells: BoolGrid) -> Self {
        Self {
            unmarked_count: cells.cells.len(),
            cells,
        }
    }

    pub fn shape(&self) -> GridShape {
        self.cells.shape()
    }

    /// Whether the given cell has been claimed.
    ///
    /// # Errors
    /// Returns [`DecompositionError::CellOutOfRange`] if the cell is outside
    /// the mask.
    pub fn is_marked(&self, z: usize, y: usize, x: usize) -> Result<bool> {
        self.cells.get(z, y, x)
    }

    /// Marks every cell in the given box as claimed and returns the number of
    /// cells that were not already marked. Marking is idempotent.
    ///
    /// # Errors
    /// Returns [`DecompositionError::WindowOutOfRange`] if the box is not
    /// fully inside the mask, in which case nothing is marked.
    pub fn mark_range(
        &mut self,
        z_range: Range<usize>,
        y_range: Range<usize>,
        x_range: Range<usize>,
    ) -> Result<usize> {
        let n_newly_marked = self.cells.set_box(z_range, y_range, x_range)?;
        self.unmarked_count -= n_newly_marked;
        Ok(n_newly_marked)
    }

    /// Whether every cell has been claimed.
    pub fn all_marked(&self) -> bool {
        self.unmarked_count == 0
    }

    /// Returns the number of cells not yet claimed.
    pub fn unmarked_count(&self) -> usize {
        self.unmarked_count
    }

    /// Returns the mask bytes of the given segment of a row, where
    /// [`MARKED`] denotes a claimed cell.
    ///
    /// # Errors
    /// Returns [`DecompositionError::RowOutOfRange`] if any part of the
    /// segment is outside the mask.
    pub fn row(&self, z: usize, y: usize, x_range: Range<usize>) -> Result<&[u8]> {
        self.cells.row(z, y, x_range)
    }

    /// Returns the first unclaimed cell at or after the given cell in scan
    /// order, or [`None`] if there is none.
    ///
    /// # Errors
    /// See [`BoolGrid::first_unset_from`].
    pub fn first_unmarked_from(&self, start: GridPoint) -> Result<Option<GridPoint>> {
        if self.all_marked() {
            return Ok(None);
        }
        self.cells.first_unset_from(start)
    }
}
