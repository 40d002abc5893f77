//! Configuration of decomposition runs.

use crate::{error::Result, io::parse_ron_file};
use serde::{Deserialize, Serialize};
use std::{num::NonZeroUsize, path::Path, thread};

/// Configuration parameters for decomposing a grid.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionConfig {
    pub seed_strategy: SeedStrategy,
    pub partitioning: PartitioningConfig,
}

/// How the next block's starting cell and tag are chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeedStrategy {
    /// Start from the first unclaimed cell in scan order (x fastest, then y,
    /// then z) and use its tag.
    #[default]
    FirstUnmarked,
    /// Use the most frequent tag among unclaimed cells and start from the
    /// first position of the largest unclaimed cube holding only that tag.
    MostFrequentTag,
}

/// Axis along which a volume is cut into partitions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionAxis {
    #[default]
    Z,
    Y,
    X,
}

/// Configuration parameters for decomposing a volume in parallel partitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitioningConfig {
    /// Number of worker threads decomposing partitions.
    pub n_workers: NonZeroUsize,
    /// Number of slabs to cut the volume into. Volumes thinner than this
    /// along the partition axis get one slab per layer.
    pub n_partitions: NonZeroUsize,
    pub axis: PartitionAxis,
}

impl DecompositionConfig {
    /// Reads the configuration from the RON file at the given path. Missing
    /// fields take their default values.
    ///
    /// # Errors
    /// Returns [`Io`](crate::DecompositionError::Io) or
    /// [`RonFile`](crate::DecompositionError::RonFile) if the file can not be
    /// read or parsed.
    pub fn from_ron_file(file_path: impl AsRef<Path>) -> Result<Self> {
        parse_ron_file(file_path)
    }
}

impl Default for PartitioningConfig {
    fn default() -> Self {
        let n_workers = thread::available_parallelism().unwrap_or(NonZeroUsize::MIN);
        Self {
            n_workers,
            n_partitions: n_workers,
            axis: PartitionAxis::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_fill_in_missing_fields_with_defaults() {
        let config: DecompositionConfig =
            ron::from_str("(partitioning: (n_partitions: 6, axis: Y))").unwrap();
        assert_eq!(config.seed_strategy, SeedStrategy::FirstUnmarked);
        assert_eq!(config.partitioning.n_partitions.get(), 6);
        assert_eq!(config.partitioning.axis, PartitionAxis::Y);
        assert_eq!(
            config.partitioning.n_workers,
            PartitioningConfig::default().n_workers
        );
    }

    #[test]
    fn should_reject_zero_partitions() {
        assert!(ron::from_str::<PartitioningConfig>("(n_partitions: 0)").is_err());
    }

    #[test]
    fn empty_config_is_default() {
        let config: DecompositionConfig = ron::from_str("()").unwrap();
        assert_eq!(config, DecompositionConfig::default());
    }
}
