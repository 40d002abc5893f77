//! End-to-end decomposition tests.

use proptest::prelude::*;
use std::{num::NonZeroUsize, sync::Arc};
use voxel_cuboids::{
    Block, GridShape, GridWindow, PartitionAxis, PartitionScheduler, PartitionSummary,
    PartitioningConfig, RecordingSink, SeedStrategy, SynchronizedSink, TagTable, TextBlockSink,
    VoxelGrid,
    decomposition::BlockDecomposer, partition::partition_into_slabs, tag::TagTableSpecification,
    validation::validate_decomposition,
};

const TERRAIN: &str = "\
RRRRRR
RRRRRR
WWAAAA

RRRRRR
RRRWRR
WWAAAA

RRRRRR
RRRRRR
AAAAAA
";

fn terrain_table() -> TagTable {
    let specification: TagTableSpecification =
        ron::from_str(r#"{ 'R': "rock", 'A': "air" }"#).unwrap();
    TagTable::from_specification(specification).unwrap()
}

fn scheduler(axis: PartitionAxis, n_partitions: usize) -> PartitionScheduler {
    PartitionScheduler::new(
        PartitioningConfig {
            n_workers: NonZeroUsize::new(2).unwrap(),
            n_partitions: NonZeroUsize::new(n_partitions).unwrap(),
            axis,
        },
        SeedStrategy::FirstUnmarked,
    )
}

#[test]
fn text_grid_should_decompose_into_labeled_records() {
    let grid = VoxelGrid::parse_slices(TERRAIN).unwrap();
    assert_eq!(grid.shape(), GridShape::new(3, 3, 6));

    let mut sink = TextBlockSink::new(Vec::new(), terrain_table());
    let summary = BlockDecomposer::new(grid.whole_region(), SeedStrategy::FirstUnmarked)
        .run(&mut sink)
        .unwrap();
    let text = String::from_utf8(sink.into_inner()).unwrap();
    let records: Vec<_> = text.lines().collect();

    assert_eq!(records.len(), summary.n_blocks);
    assert_eq!(summary.covered_volume, 54);
    assert_eq!(records[0], "0,0,0,6,1,3,rock");
    assert!(records.iter().any(|record| record.ends_with(",W")));
    assert!(records.iter().any(|record| record.ends_with(",air")));
}

#[test]
fn records_should_reconstruct_grid() {
    let grid = VoxelGrid::parse_slices(TERRAIN).unwrap();
    let shape = grid.shape();

    let mut sink = TextBlockSink::new(Vec::new(), TagTable::new());
    BlockDecomposer::new(grid.whole_region(), SeedStrategy::MostFrequentTag)
        .run(&mut sink)
        .unwrap();
    let text = String::from_utf8(sink.into_inner()).unwrap();

    let mut tags = vec![0_u8; shape.volume()];
    for record in text.lines() {
        let fields: Vec<_> = record.split(',').collect();
        let numbers: Vec<usize> = fields[..6].iter().map(|f| f.parse().unwrap()).collect();
        let &[x, y, z, width, height, depth] = numbers.as_slice() else {
            panic!("Malformed record {record}");
        };
        let tag = fields[6].as_bytes()[0];
        for k in z..z + depth {
            for j in y..y + height {
                for i in x..x + width {
                    let idx = (k * shape.height + j) * shape.width + i;
                    assert_eq!(tags[idx], 0, "Cell covered twice by {record}");
                    tags[idx] = tag;
                }
            }
        }
    }
    assert_eq!(tags, grid.tags());
}

#[test]
fn partitioned_decomposition_should_match_whole_coverage() {
    let grid = Arc::new(VoxelGrid::parse_slices(TERRAIN).unwrap());

    let whole =
        voxel_cuboids::decompose(grid.whole_region(), SeedStrategy::FirstUnmarked).unwrap();

    for axis in [PartitionAxis::Z, PartitionAxis::Y, PartitionAxis::X] {
        let scheduler = scheduler(axis, 2);
        let partitions = scheduler.slabs_for(grid.shape());
        let sink = SynchronizedSink::new(Vec::<Block>::new());

        let summaries = scheduler
            .decompose(Arc::clone(&grid), &partitions, sink.clone())
            .unwrap();
        let blocks = sink.try_into_inner().unwrap();

        validate_decomposition(&grid.whole_region(), &blocks).unwrap();
        assert_eq!(
            PartitionSummary::total(&summaries).covered_volume,
            whole.iter().map(Block::volume).sum::<usize>()
        );
    }
}

#[test]
fn recorded_slab_output_should_validate_along_every_axis() {
    let grid = Arc::new(VoxelGrid::parse_slices(TERRAIN).unwrap());

    for axis in [PartitionAxis::Z, PartitionAxis::Y, PartitionAxis::X] {
        for n_partitions in 2..=3 {
            let scheduler = scheduler(axis, n_partitions);
            let partitions = scheduler.slabs_for(grid.shape());
            assert_eq!(partitions.len(), n_partitions);

            let sink = SynchronizedSink::new(RecordingSink::new(
                TextBlockSink::new(Vec::new(), terrain_table()),
                true,
            ));
            scheduler
                .decompose(Arc::clone(&grid), &partitions, sink.clone())
                .unwrap();
            let (records, blocks) = sink.try_into_inner().unwrap().into_parts();
            let blocks = blocks.unwrap();

            validate_decomposition(&grid.whole_region(), &blocks).unwrap();

            let text = String::from_utf8(records.into_inner()).unwrap();
            assert_eq!(text.lines().count(), blocks.len());

            for block in &blocks {
                let partition_origin = block.origin().checked_offset_from(block.offset());
                let partition = partitions
                    .iter()
                    .find(|partition| Some(partition.origin) == partition_origin)
                    .unwrap();
                let origin_in_partition = block.origin().checked_offset_from(partition.origin);
                assert!(origin_in_partition.is_some_and(|origin| {
                    GridWindow::new(origin, block.shape()).fits_within(partition.shape)
                }));
            }
        }
    }
}

prop_compose! {
    fn grid_strategy()(
        depth in 1_usize..6,
        height in 1_usize..6,
        width in 1_usize..6,
    )(
        tags in prop::collection::vec(
            prop::sample::select(vec![b'A', b'B']),
            depth * height * width,
        ),
        depth in Just(depth),
        height in Just(height),
        width in Just(width),
    ) -> VoxelGrid {
        VoxelGrid::from_tags(GridShape::new(depth, height, width), tags).unwrap()
    }
}

proptest! {
    #[test]
    fn parallel_slabs_should_cover_grid_exactly(
        grid in grid_strategy(),
        n_partitions in 1_usize..5,
    ) {
        let grid = Arc::new(grid);
        let partitions = partition_into_slabs(
            GridWindow::covering(grid.shape()),
            NonZeroUsize::new(n_partitions).unwrap(),
            PartitionAxis::Z,
        );
        let sink = SynchronizedSink::new(Vec::<Block>::new());

        scheduler(PartitionAxis::Z, n_partitions)
            .decompose(Arc::clone(&grid), &partitions, sink.clone())
            .unwrap();
        let blocks = sink.try_into_inner().unwrap();

        prop_assert!(validate_decomposition(&grid.whole_region(), &blocks).is_ok());
    }
}
