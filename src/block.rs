//! Homogeneous axis-aligned blocks produced by decomposition.

use crate::{
    grid::{GridPoint, GridShape, GridWindow},
    tag::{Tag, TagTable},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An axis-aligned box of cells that all hold the same tag.
///
/// A block knows both its position in the outermost grid (`origin`) and its
/// position relative to the region it was found in (`offset`). Every extent
/// is at least one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    origin: GridPoint,
    offset: GridPoint,
    shape: GridShape,
    tag: Tag,
}

impl Block {
    /// Creates a block with the given region-local offset and shape inside a
    /// region whose lowest corner sits at `region_origin` in the outermost
    /// grid.
    pub fn new(region_origin: GridPoint, offset: GridPoint, shape: GridShape, tag: Tag) -> Self {
        Self {
            origin: region_origin.offset_by(offset),
            offset,
            shape,
            tag,
        }
    }

    /// Returns the indices of the block's lowest corner in the outermost
    /// grid.
    pub fn origin(&self) -> GridPoint {
        self.origin
    }

    /// Returns the indices of the block's lowest corner relative to the
    /// region it was found in.
    pub fn offset(&self) -> GridPoint {
        self.offset
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn x(&self) -> usize {
        self.origin.x
    }

    pub fn y(&self) -> usize {
        self.origin.y
    }

    pub fn z(&self) -> usize {
        self.origin.z
    }

    pub fn width(&self) -> usize {
        self.shape.width
    }

    pub fn height(&self) -> usize {
        self.shape.height
    }

    pub fn depth(&self) -> usize {
        self.shape.depth
    }

    pub fn volume(&self) -> usize {
        self.shape.volume()
    }

    /// Returns the window covered by the block in the outermost grid.
    pub fn world_window(&self) -> GridWindow {
        GridWindow::new(self.origin, self.shape)
    }

    /// Formats the block as an output record line (without line terminator):
    /// `x,y,z,width,height,depth,label`.
    pub fn record(&self, tag_table: &TagTable) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.x(),
            self.y(),
            self.z(),
            self.width(),
            self.height(),
            self.depth(),
            tag_table.label(self.tag)
        )
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' block {}", self.tag, self.world_window())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_place_block_relative_to_region_origin() {
        let block = Block::new(
            GridPoint::new(4, 0, 2),
            GridPoint::new(1, 2, 3),
            GridShape::new(2, 1, 5),
            Tag::from_byte(b'R'),
        );
        assert_eq!((block.x(), block.y(), block.z()), (5, 2, 5));
        assert_eq!(block.offset(), GridPoint::new(1, 2, 3));
        assert_eq!((block.width(), block.height(), block.depth()), (5, 1, 2));
        assert_eq!(block.volume(), 10);
    }

    #[test]
    fn should_format_record_with_label() {
        let table = TagTable::from_labels([('R', "rock")]).unwrap();
        let block = Block::new(
            GridPoint::ORIGIN,
            GridPoint::new(0, 1, 2),
            GridShape::new(3, 2, 1),
            Tag::from_byte(b'R'),
        );
        assert_eq!(block.record(&table), "2,1,0,1,2,3,rock");
    }

    #[test]
    fn record_should_fall_back_to_tag_character() {
        let block = Block::new(
            GridPoint::ORIGIN,
            GridPoint::ORIGIN,
            GridShape::new(1, 1, 1),
            Tag::from_byte(b'W'),
        );
        assert_eq!(block.record(&TagTable::new()), "0,0,0,1,1,1,W");
    }
}
