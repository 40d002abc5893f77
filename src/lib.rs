//! Lossless decomposition of labeled voxel grids into homogeneous
//! axis-aligned blocks.

#[macro_use]
mod macros;

pub mod block;
pub mod config;
pub mod decomposition;
pub mod error;
pub mod grid;
pub mod io;
pub mod mask;
pub mod partition;
pub mod scan;
pub mod sink;
pub mod tag;
pub mod thread;
pub mod validation;

pub use block::Block;
pub use config::{DecompositionConfig, PartitionAxis, PartitioningConfig, SeedStrategy};
pub use decomposition::{BlockDecomposer, DecompositionSummary, decompose};
pub use error::{DecompositionError, Result};
pub use grid::{GridPoint, GridShape, GridWindow, VoxelGrid, VoxelRegion};
pub use mask::CompressionMask;
pub use partition::{PartitionScheduler, PartitionSummary};
pub use sink::{BlockSink, RecordingSink, SynchronizedSink, TextBlockSink};
pub use tag::{Tag, TagTable};
