//! Parallel decomposition of disjoint partitions of a grid.

use crate::{
    config::{DecompositionConfig, PartitionAxis, PartitioningConfig, SeedStrategy},
    decomposition::{BlockDecomposer, DecompositionSummary},
    error::{DecompositionError, Result},
    grid::{GridPoint, GridShape, GridWindow, VoxelGrid},
    sink::{BlockSink, SynchronizedSink},
    thread::{self, TaskID, WorkerPool},
};
use anyhow::anyhow;
use parking_lot::Mutex;
use std::{
    mem,
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

/// Decomposes disjoint partitions of a grid concurrently on a fixed-size
/// worker pool, feeding every block into one shared sink.
///
/// Blocks of a single partition reach the sink in the order they were found,
/// while blocks of different partitions may interleave.
#[derive(Clone, Debug)]
pub struct PartitionScheduler {
    config: PartitioningConfig,
    seed_strategy: SeedStrategy,
}

/// Totals over the blocks emitted for one partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionSummary {
    pub partition_idx: usize,
    pub window: GridWindow,
    pub decomposition: DecompositionSummary,
}

impl PartitionScheduler {
    pub fn new(config: PartitioningConfig, seed_strategy: SeedStrategy) -> Self {
        Self {
            config,
            seed_strategy,
        }
    }

    pub fn from_config(config: &DecompositionConfig) -> Self {
        Self::new(config.partitioning.clone(), config.seed_strategy)
    }

    pub fn config(&self) -> &PartitioningConfig {
        &self.config
    }

    /// Cuts a grid with the given shape into slabs according to the
    /// configuration.
    pub fn slabs_for(&self, shape: GridShape) -> Vec<GridWindow> {
        partition_into_slabs(
            GridWindow::covering(shape),
            self.config.n_partitions,
            self.config.axis,
        )
    }

    /// Decomposes each of the given partitions of the grid on the worker
    /// pool, emitting blocks into the shared sink, and returns a summary for
    /// each partition ordered by partition index.
    ///
    /// # Errors
    /// Returns an error if the partitions do not lie inside the grid or
    /// overlap, in which case no work is started, if the worker pool could
    /// not be started, or [`DecompositionError::PartitionsFailed`] naming
    /// every partition whose decomposition failed or panicked.
    pub fn decompose<S>(
        &self,
        grid: Arc<VoxelGrid>,
        partitions: &[GridWindow],
        sink: SynchronizedSink<S>,
    ) -> Result<Vec<PartitionSummary>>
    where
        S: BlockSink + Send + 'static,
    {
        validate_partitions(grid.shape(), partitions)?;

        if partitions.is_empty() {
            return Ok(Vec::new());
        }

        log::debug!(
            "Decomposing {} partitions of grid with shape {} using {} workers",
            partitions.len(),
            grid.shape(),
            self.config.n_workers
        );

        let summaries = Arc::new(Mutex::new(Vec::with_capacity(partitions.len())));

        let pool = {
            let summaries = Arc::clone(&summaries);
            let seed_strategy = self.seed_strategy;

            WorkerPool::new(
                self.config.n_workers,
                move |(partition_idx, window): (usize, GridWindow)| {
                    let mut sink = sink.clone();
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        decompose_partition(&grid, partition_idx, window, seed_strategy, &mut sink)
                    }));
                    match outcome {
                        Ok(Ok(summary)) => {
                            summaries.lock().push(summary);
                            Ok(())
                        }
                        Ok(Err(error)) => Err((partition_idx as TaskID, anyhow::Error::from(error))),
                        Err(payload) => Err((
                            partition_idx as TaskID,
                            anyhow!("panicked: {}", thread::panic_message(payload.as_ref())),
                        )),
                    }
                },
            )
            .map_err(DecompositionError::WorkerPool)?
        };

        let result = with_timing_info_logging!(
            "Decomposing {} partitions", partitions.len();
            pool.execute_and_wait(partitions.iter().copied().enumerate())
        );
        drop(pool);

        if let Err(errors) = result {
            let failed_task_ids = errors.failed_task_ids();
            let first_reason = failed_task_ids
                .first()
                .and_then(|&task_id| errors.get_error_of(task_id))
                .map(|error| format!("{error:#}"))
                .or_else(|| {
                    errors
                        .panic_messages()
                        .first()
                        .map(|message| format!("panicked: {message}"))
                })
                .unwrap_or_default();

            return Err(DecompositionError::PartitionsFailed {
                failed_partitions: failed_task_ids
                    .into_iter()
                    .map(|task_id| task_id as usize)
                    .collect(),
                first_reason,
            });
        }

        let mut summaries = mem::take(&mut *summaries.lock());
        summaries.sort_by_key(|summary| summary.partition_idx);
        Ok(summaries)
    }
}

impl PartitionSummary {
    /// Combines the totals of all the given partitions.
    pub fn total<'a>(summaries: impl IntoIterator<Item = &'a Self>) -> DecompositionSummary {
        summaries
            .into_iter()
            .fold(DecompositionSummary::default(), |mut total, summary| {
                total.combine(&summary.decomposition);
                total
            })
    }
}

/// Cuts the window into at most `n_partitions` consecutive slabs along the
/// given axis. The slabs differ in thickness by at most one cell, with the
/// thicker slabs first. An empty window gives no slabs.
pub fn partition_into_slabs(
    window: GridWindow,
    n_partitions: NonZeroUsize,
    axis: PartitionAxis,
) -> Vec<GridWindow> {
    if window.shape.is_empty() {
        return Vec::new();
    }

    let extent = match axis {
        PartitionAxis::Z => window.shape.depth,
        PartitionAxis::Y => window.shape.height,
        PartitionAxis::X => window.shape.width,
    };
    let n_slabs = n_partitions.get().min(extent);
    let base_thickness = extent / n_slabs;
    let n_thick_slabs = extent % n_slabs;

    let mut slabs = Vec::with_capacity(n_slabs);
    let mut start = 0;

    for slab_idx in 0..n_slabs {
        let thickness = base_thickness + usize::from(slab_idx < n_thick_slabs);

        let GridPoint { z, y, x } = window.origin;
        let GridShape {
            depth,
            height,
            width,
        } = window.shape;

        let slab = match axis {
            PartitionAxis::Z => GridWindow::new(
                GridPoint::new(z + start, y, x),
                GridShape::new(thickness, height, width),
            ),
            PartitionAxis::Y => GridWindow::new(
                GridPoint::new(z, y + start, x),
                GridShape::new(depth, thickness, width),
            ),
            PartitionAxis::X => GridWindow::new(
                GridPoint::new(z, y, x + start),
                GridShape::new(depth, height, thickness),
            ),
        };
        slabs.push(slab);
        start += thickness;
    }

    slabs
}

/// Checks that every partition lies inside a grid with the given shape and
/// that no two partitions share a cell.
///
/// # Errors
/// Returns [`DecompositionError::WindowOutOfRange`] or
/// [`DecompositionError::OverlappingPartitions`] for the first offending
/// partition.
pub fn validate_partitions(grid_shape: GridShape, partitions: &[GridWindow]) -> Result<()> {
    for partition in partitions {
        if !partition.fits_within(grid_shape) {
            return Err(DecompositionError::WindowOutOfRange {
                origin: partition.origin,
                shape: partition.shape,
                bounds: grid_shape,
            });
        }
    }
    for (first, partition) in partitions.iter().enumerate() {
        for (second, other) in partitions.iter().enumerate().skip(first + 1) {
            if partition.overlaps(other) {
                return Err(DecompositionError::OverlappingPartitions { first, second });
            }
        }
    }
    Ok(())
}

fn decompose_partition<S: BlockSink>(
    grid: &VoxelGrid,
    partition_idx: usize,
    window: GridWindow,
    seed_strategy: SeedStrategy,
    sink: &mut S,
) -> Result<PartitionSummary> {
    let region = grid.region(window)?;
    let decomposition = BlockDecomposer::new(region, seed_strategy).run(sink)?;
    log::debug!(
        "Partition {} ({}) gave {} blocks",
        partition_idx,
        window,
        decomposition.n_blocks
    );
    Ok(PartitionSummary {
        partition_idx,
        window,
        decomposition,
    })
}
