use anyhow::Result;

#[cfg(feature = "cli")]
mod main {
    use super::*;
    use anyhow::{Context, anyhow};
    use clap::Parser;
    use std::{
        io::{self, BufWriter, Write},
        num::NonZeroUsize,
        path::PathBuf,
        sync::Arc,
        time::Instant,
    };
    use voxel_cuboids::{
        DecompositionConfig, PartitionScheduler, PartitionSummary, RecordingSink,
        SynchronizedSink, TagTable, TextBlockSink,
        io::{create_record_file, read_grid_file},
        validation::validate_decomposition,
    };

    #[derive(Debug, Parser)]
    #[command(
        about = "Decompose a voxel grid into homogeneous axis-aligned blocks",
        long_about = None
    )]
    struct Cli {
        /// Path to text file holding the grid, one row of tag characters per
        /// line with z-slices separated by blank lines
        #[arg(short, long)]
        grid: PathBuf,

        /// Path to RON file mapping tag characters to labels
        #[arg(short, long)]
        tags: Option<PathBuf>,

        /// Path to RON configuration file to use
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of worker threads (overrides the configuration)
        #[arg(short, long)]
        workers: Option<NonZeroUsize>,

        /// Number of slabs to cut the grid into (overrides the configuration)
        #[arg(short, long)]
        partitions: Option<NonZeroUsize>,

        /// Path where the block records should be written (standard output if
        /// omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Check that the blocks cover the grid exactly before exiting
        #[arg(long)]
        validate: bool,
    }

    pub fn main() -> Result<()> {
        env_logger::init();

        let cli = Cli::parse();

        let mut config = match cli.config {
            Some(file_path) => DecompositionConfig::from_ron_file(file_path)?,
            None => DecompositionConfig::default(),
        };
        if let Some(n_workers) = cli.workers {
            config.partitioning.n_workers = n_workers;
        }
        if let Some(n_partitions) = cli.partitions {
            config.partitioning.n_partitions = n_partitions;
        }

        let grid = Arc::new(
            read_grid_file(&cli.grid)
                .with_context(|| format!("Could not load grid from {}", cli.grid.display()))?,
        );
        log::info!("Loaded grid of shape {}", grid.shape());

        let tag_table = match cli.tags {
            Some(file_path) => TagTable::from_ron_file(file_path)?,
            None => TagTable::new(),
        };

        let writer: Box<dyn Write + Send> = match &cli.output {
            Some(file_path) => Box::new(create_record_file(file_path)?),
            None => Box::new(BufWriter::new(io::stdout())),
        };

        let sink = SynchronizedSink::new(RecordingSink::new(
            TextBlockSink::new(writer, tag_table),
            cli.validate,
        ));

        let scheduler = PartitionScheduler::from_config(&config);
        let partitions = scheduler.slabs_for(grid.shape());

        let start_time = Instant::now();
        let summaries = scheduler.decompose(Arc::clone(&grid), &partitions, sink.clone())?;
        let total = PartitionSummary::total(&summaries);
        log::info!(
            "Decomposed {} cells into {} blocks (largest {}) in {:.2} ms",
            total.covered_volume,
            total.n_blocks,
            total.largest_block_volume,
            start_time.elapsed().as_secs_f64() * 1e3
        );

        let (mut records, blocks) = sink
            .try_into_inner()
            .map_err(|_sink| anyhow!("Block sink is still in use after decomposition"))?
            .into_parts();
        records.flush()?;

        if let Some(blocks) = blocks {
            validate_decomposition(&grid.whole_region(), &blocks)?;
            log::info!("Decomposition is valid");
        }

        Ok(())
    }
}

#[cfg(not(feature = "cli"))]
mod main {
    use super::*;

    pub fn main() -> Result<()> {
        anyhow::bail!("This binary requires the `cli` feature to be enabled.")
    }
}

fn main() -> Result<()> {
    main::main()
}
