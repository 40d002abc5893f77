//! Errors produced while building, decomposing and validating voxel regions.

use crate::grid::{GridPoint, GridShape};
use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DecompositionError>;

#[derive(Error, Debug)]
pub enum DecompositionError {
    #[error("Window at {origin} with shape {shape} does not fit inside grid of shape {bounds}")]
    WindowOutOfRange {
        origin: GridPoint,
        shape: GridShape,
        bounds: GridShape,
    },

    #[error("Cell {point} is outside region of shape {shape}")]
    CellOutOfRange { point: GridPoint, shape: GridShape },

    #[error("Row segment {x_start}..{x_end} at z = {z}, y = {y} is outside region of shape {shape}")]
    RowOutOfRange {
        z: usize,
        y: usize,
        x_start: usize,
        x_end: usize,
        shape: GridShape,
    },

    #[error("Got {n_tags} tags for grid of shape {shape}")]
    ShapeMismatch { n_tags: usize, shape: GridShape },

    #[error("Grid of shape {0} has more cells than can be addressed")]
    ShapeTooLarge(GridShape),

    #[error("Invalid grid text on line {line}: {reason}")]
    GridSyntax { line: usize, reason: String },

    #[error("Tag {0:?} is reserved or does not fit in a single byte")]
    ReservedTag(char),

    #[error("Decomposition state is inconsistent: {0}")]
    InvariantViolation(String),

    #[error("Partitions {first} and {second} overlap")]
    OverlappingPartitions { first: usize, second: usize },

    #[error("Partitions {failed_partitions:?} failed, first failure: {first_reason}")]
    PartitionsFailed {
        failed_partitions: Vec<usize>,
        first_reason: String,
    },

    #[error("Failed to start worker pool")]
    WorkerPool(#[source] io::Error),

    #[error("Could not access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid syntax in {}", path.display())]
    RonFile {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error("Decomposition is invalid: {0}")]
    Validation(String),

    #[error(transparent)]
    Sink(#[from] anyhow::Error),
}
