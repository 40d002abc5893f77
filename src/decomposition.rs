//! Greedy decomposition of a voxel region into homogeneous blocks.
//!
//! A decomposition repeatedly picks a seed cell that has not been claimed
//! yet, finds the largest box anchored at the seed whose cells all hold the
//! seed's tag and are unclaimed, emits that box as a [`Block`] and claims its
//! cells in the [`CompressionMask`]. Every step claims at least the seed, so
//! the process ends once the mask is full, at which point the emitted blocks
//! cover the region exactly once.

use crate::{
    block::Block,
    config::SeedStrategy,
    error::{DecompositionError, Result},
    grid::{GridPoint, GridShape, VoxelRegion},
    mask::{CompressionMask, MARKED, UNMARKED},
    scan,
    sink::BlockSink,
    tag::Tag,
};
use nohash_hasher::BuildNoHashHasher;
use std::{collections::HashMap, iter::FusedIterator};

/// Decomposes a [`VoxelRegion`] into blocks, one block per call to
/// [`next_block`](Self::next_block).
///
/// The decomposer is also an [`Iterator`] over the blocks, which stops after
/// the first error.
#[derive(Debug)]
pub struct BlockDecomposer<'a> {
    region: VoxelRegion<'a>,
    mask: CompressionMask,
    seed_strategy: SeedStrategy,
    scan_cursor: GridPoint,
    cube_cursors: HashMap<u8, CubeCursor, BuildNoHashHasher<u8>>,
    failed: bool,
}

/// Totals over the blocks emitted in a decomposition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecompositionSummary {
    pub n_blocks: usize,
    pub covered_volume: usize,
    pub largest_block_volume: usize,
}

/// Resumable search for the largest cube of unclaimed cells holding one tag.
///
/// Cells are only ever claimed, never released, so an edge length without a
/// free cube never gets one later, and neither does a rejected corner. The
/// cursor therefore only moves forward, first through corners in scan order
/// and then to shorter edges.
#[derive(Clone, Copy, Debug)]
struct CubeCursor {
    edge: usize,
    next_corner: GridPoint,
}

#[derive(Clone, Copy, Debug)]
struct Seed {
    point: GridPoint,
    tag: Tag,
}

/// State of the search for the largest box anchored at a seed.
///
/// The search walks the layers of the box along z and the rows of each layer
/// along y. For each row offset it keeps the widest free run that is still
/// available in every layer visited so far and in every row below it, so the
/// width of the largest box with a given depth and height is known as soon as
/// its last row is scanned.
#[derive(Debug)]
struct GrowthSearch {
    row_widths: Vec<usize>,
    height_limit: usize,
    best_shape: GridShape,
}

impl<'a> BlockDecomposer<'a> {
    /// Creates a decomposer for the given region with nothing claimed yet.
    pub fn new(region: VoxelRegion<'a>, seed_strategy: SeedStrategy) -> Self {
        Self {
            mask: CompressionMask::for_region(&region),
            region,
            seed_strategy,
            scan_cursor: GridPoint::ORIGIN,
            cube_cursors: HashMap::default(),
            failed: false,
        }
    }

    pub fn region(&self) -> &VoxelRegion<'a> {
        &self.region
    }

    pub fn mask(&self) -> &CompressionMask {
        &self.mask
    }

    pub fn seed_strategy(&self) -> SeedStrategy {
        self.seed_strategy
    }

    /// Whether every cell of the region has been claimed by a block.
    pub fn is_finished(&self) -> bool {
        self.mask.all_marked()
    }

    /// Finds, claims and returns the next block, or returns [`None`] if the
    /// whole region has been claimed.
    ///
    /// # Errors
    /// Returns [`DecompositionError::InvariantViolation`] if the mask reports
    /// unclaimed cells but no seed can be found, or if the grown block does
    /// not consist solely of unclaimed cells.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        if self.is_finished() {
            return Ok(None);
        }

        let seed = self.select_seed()?;
        let shape = grow_box(&self.region, &self.mask, seed)?;

        let offset = seed.point;
        let n_newly_marked = self.mask.mark_range(
            offset.z..offset.z + shape.depth,
            offset.y..offset.y + shape.height,
            offset.x..offset.x + shape.width,
        )?;
        if n_newly_marked != shape.volume() {
            return Err(DecompositionError::InvariantViolation(format!(
                "block of shape {shape} at {offset} claimed {n_newly_marked} new cells"
            )));
        }

        let block = Block::new(self.region.origin(), offset, shape, seed.tag);
        log::trace!("Emitting {block}");
        Ok(Some(block))
    }

    /// Decomposes the remaining part of the region, passing each block to the
    /// given sink as soon as it is found.
    ///
    /// # Errors
    /// Returns an error if finding a block fails (see
    /// [`next_block`](Self::next_block)) or if the sink fails to consume a
    /// block, in which case the decomposition stops.
    pub fn run<S: BlockSink + ?Sized>(&mut self, sink: &mut S) -> Result<DecompositionSummary> {
        let region_window = *self.region.window();
        with_debug_logging!("Decomposing region {}", region_window; {
            let mut summary = DecompositionSummary::default();
            while let Some(block) = self.next_block()? {
                sink.emit(&block)?;
                summary.add(&block);
            }
            log::debug!(
                "Region {} decomposed into {} blocks",
                region_window,
                summary.n_blocks
            );
            Ok(summary)
        })
    }

    fn select_seed(&mut self) -> Result<Seed> {
        match self.seed_strategy {
            SeedStrategy::FirstUnmarked => self.select_first_unmarked_seed(),
            SeedStrategy::MostFrequentTag => self.select_most_frequent_tag_seed(),
        }
    }

    fn select_first_unmarked_seed(&mut self) -> Result<Seed> {
        let point = self
            .mask
            .first_unmarked_from(self.scan_cursor)?
            .ok_or_else(|| {
                DecompositionError::InvariantViolation(format!(
                    "{} cells are unclaimed but none were found after {}",
                    self.mask.unmarked_count(),
                    self.scan_cursor
                ))
            })?;

        // Cells before the seed in scan order stay claimed from here on
        self.scan_cursor = point;

        let tag = self.region.at(point.z, point.y, point.x)?;
        Ok(Seed { point, tag })
    }

    fn select_most_frequent_tag_seed(&mut self) -> Result<Seed> {
        let (tag, count) = most_frequent_unmarked_tag(&self.region, &self.mask)?.ok_or_else(|| {
            DecompositionError::InvariantViolation(format!(
                "{} cells are unclaimed but no unclaimed tags were counted",
                self.mask.unmarked_count()
            ))
        })?;

        let region = &self.region;
        let cursor = self
            .cube_cursors
            .entry(tag.byte())
            .or_insert_with(|| CubeCursor::for_region(region));

        let point = cursor
            .find_largest_free_cube(region, &self.mask, tag, count)?
            .ok_or_else(|| {
                DecompositionError::InvariantViolation(format!(
                    "tag {tag:?} has {count} unclaimed cells but none could be found"
                ))
            })?;

        Ok(Seed { point, tag })
    }
}

impl Iterator for BlockDecomposer<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = self.next_block().transpose();
        if matches!(result, Some(Err(_))) {
            self.failed = true;
        }
        result
    }
}

impl FusedIterator for BlockDecomposer<'_> {}

impl DecompositionSummary {
    /// Includes the given block in the totals.
    pub fn add(&mut self, block: &Block) {
        self.n_blocks += 1;
        self.covered_volume += block.volume();
        self.largest_block_volume = self.largest_block_volume.max(block.volume());
    }

    /// Includes the totals of another decomposition in these totals.
    pub fn combine(&mut self, other: &Self) {
        self.n_blocks += other.n_blocks;
        self.covered_volume += other.covered_volume;
        self.largest_block_volume = self.largest_block_volume.max(other.largest_block_volume);
    }
}

impl GrowthSearch {
    fn new(max_height: usize, max_width: usize) -> Self {
        Self {
            row_widths: vec![max_width; max_height],
            height_limit: max_height,
            best_shape: GridShape::default(),
        }
    }

    /// Records the given box if it is strictly larger than the best so far.
    fn consider(&mut self, shape: GridShape) {
        if shape.volume() > self.best_shape.volume() {
            self.best_shape = shape;
        }
    }
}

/// Decomposes the whole region and returns the blocks in emission order.
///
/// # Errors
/// See [`BlockDecomposer::next_block`].
pub fn decompose(region: VoxelRegion<'_>, seed_strategy: SeedStrategy) -> Result<Vec<Block>> {
    BlockDecomposer::new(region, seed_strategy).collect()
}

/// Finds the shape of the largest box with its lowest corner at the seed
/// whose cells all have the seed's tag and are unclaimed. Among boxes of
/// equal volume the one with the smallest depth, then smallest height, wins.
fn grow_box(region: &VoxelRegion<'_>, mask: &CompressionMask, seed: Seed) -> Result<GridShape> {
    let shape = region.shape();
    let GridPoint { z, y, x } = seed.point;

    let mut search = GrowthSearch::new(shape.height - y, shape.width - x);

    for dz in 0..shape.depth - z {
        let mut layer_width = usize::MAX;
        let mut layer_height = 0;

        for dy in 0..search.height_limit {
            let max_width = search.row_widths[dy].min(layer_width);
            let width = scan::free_run_len(region, mask, z + dz, y + dy, x, max_width, seed.tag)?;
            if width == 0 {
                // No box with this row or any above it can extend deeper
                search.height_limit = dy;
                break;
            }
            search.row_widths[dy] = width;
            layer_width = width;
            layer_height = dy + 1;
            search.consider(GridShape::new(dz + 1, layer_height, width));
        }

        if layer_height == 0 {
            break;
        }
    }

    if search.best_shape.is_empty() {
        return Err(DecompositionError::InvariantViolation(format!(
            "seed {} with tag {:?} is not free",
            seed.point, seed.tag
        )));
    }
    Ok(search.best_shape)
}

/// Returns the tag occurring most often among unclaimed cells together with
/// its number of occurrences, or [`None`] if every cell is claimed. Ties go
/// to the lowest tag byte.
fn most_frequent_unmarked_tag(
    region: &VoxelRegion<'_>,
    mask: &CompressionMask,
) -> Result<Option<(Tag, usize)>> {
    let shape = region.shape();
    let mut counts = [0_usize; 256];

    for z in 0..shape.depth {
        for y in 0..shape.height {
            let marks = mask.row(z, y, 0..shape.width)?;
            if scan::all_bytes_equal(marks, MARKED) {
                continue;
            }
            let tags = region.row(z, y, 0..shape.width)?;

            if scan::all_bytes_equal(marks, UNMARKED) {
                match tags.first() {
                    Some(&first) if scan::all_bytes_equal(tags, first) => {
                        counts[usize::from(first)] += tags.len();
                    }
                    _ => {
                        for &tag in tags {
                            counts[usize::from(tag)] += 1;
                        }
                    }
                }
            } else {
                for (&tag, _) in tags.iter().zip(marks).filter(|&(_, &mark)| mark == UNMARKED) {
                    counts[usize::from(tag)] += 1;
                }
            }
        }
    }

    let most_frequent = counts
        .iter()
        .enumerate()
        .filter(|&(_, &count)| count > 0)
        .max_by(|(byte_a, count_a), (byte_b, count_b)| {
            count_a.cmp(count_b).then(byte_b.cmp(byte_a))
        })
        .and_then(|(byte, &count)| Some((Tag::from_byte(u8::try_from(byte).ok()?), count)));

    Ok(most_frequent)
}

impl CubeCursor {
    /// Creates a cursor starting from the largest cube fitting in the region.
    fn for_region(region: &VoxelRegion<'_>) -> Self {
        let shape = region.shape();
        Self {
            edge: shape.depth.min(shape.height).min(shape.width),
            next_corner: GridPoint::ORIGIN,
        }
    }

    /// Returns the lowest corner of the largest cube of unclaimed cells with
    /// the given tag, taking the first such corner in scan order. Cube edges
    /// whose volume exceeds the number of available cells are skipped.
    fn find_largest_free_cube(
        &mut self,
        region: &VoxelRegion<'_>,
        mask: &CompressionMask,
        tag: Tag,
        n_available: usize,
    ) -> Result<Option<GridPoint>> {
        let shape = region.shape();

        while self.edge > 0 {
            let edge = self.edge;
            if edge.checked_pow(3).is_some_and(|volume| volume <= n_available) {
                let start = self.next_corner;
                for z in start.z..=shape.depth - edge {
                    let y_start = if z == start.z { start.y } else { 0 };
                    for y in y_start..=shape.height - edge {
                        let x_start = if z == start.z && y == start.y {
                            start.x
                        } else {
                            0
                        };
                        for x in x_start..=shape.width - edge {
                            if scan::box_is_free(
                                region,
                                mask,
                                z..z + edge,
                                y..y + edge,
                                x..x + edge,
                                tag,
                            )? {
                                log::trace!("Found free {edge}-cube of tag {tag:?}");
                                self.next_corner = GridPoint::new(z, y, x);
                                return Ok(Some(self.next_corner));
                            }
                        }
                    }
                }
            }
            // Available cells only decrease, so this edge stays exhausted
            self.edge -= 1;
            self.next_corner = GridPoint::ORIGIN;
        }
        Ok(None)
    }
}
