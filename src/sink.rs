//! Receivers of emitted blocks.

use crate::{
    block::Block,
    tag::{Tag, TagTable},
};
use anyhow::Context;
use nohash_hasher::BuildNoHashHasher;
use parking_lot::Mutex;
use std::{collections::HashSet, fmt, io::Write, sync::Arc};

/// Receiver of the blocks produced by a decomposition, in emission order.
pub trait BlockSink {
    /// Consumes the given block.
    ///
    /// # Errors
    /// Returns an error if the block could not be consumed, which aborts the
    /// decomposition feeding the sink.
    fn emit(&mut self, block: &Block) -> anyhow::Result<()>;
}

/// Sink writing one `x,y,z,width,height,depth,label` line per block to a
/// writer. Tags without a label in the tag table are written as their raw
/// character, and a warning is logged the first time each such tag is seen.
pub struct TextBlockSink<W> {
    writer: W,
    tag_table: TagTable,
    unlabeled_tags: HashSet<u8, BuildNoHashHasher<u8>>,
}

/// Handle to a sink shared between threads. Each emitted block is forwarded
/// to the shared sink while holding its lock, so records from different
/// threads never interleave, and the lock is never held between records.
pub struct SynchronizedSink<S> {
    shared: Arc<Mutex<S>>,
}

/// Sink forwarding every block to another sink, optionally keeping a copy of
/// each forwarded block so that the output can be validated afterwards.
#[derive(Debug)]
pub struct RecordingSink<S> {
    inner: S,
    recorded: Option<Vec<Block>>,
}

impl BlockSink for Vec<Block> {
    fn emit(&mut self, block: &Block) -> anyhow::Result<()> {
        self.push(*block);
        Ok(())
    }
}

impl<S: BlockSink + ?Sized> BlockSink for &mut S {
    fn emit(&mut self, block: &Block) -> anyhow::Result<()> {
        (**self).emit(block)
    }
}

impl<S: BlockSink + ?Sized> BlockSink for Box<S> {
    fn emit(&mut self, block: &Block) -> anyhow::Result<()> {
        (**self).emit(block)
    }
}

impl<W: Write> TextBlockSink<W> {
    pub fn new(writer: W, tag_table: TagTable) -> Self {
        Self {
            writer,
            tag_table,
            unlabeled_tags: HashSet::default(),
        }
    }

    pub fn tag_table(&self) -> &TagTable {
        &self.tag_table
    }

    /// Flushes the underlying writer.
    ///
    /// # Errors
    /// Returns an error if the writer could not be flushed.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.writer
            .flush()
            .context("Failed to flush block records")
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn warn_if_unlabeled(&mut self, tag: Tag) {
        if self.tag_table.get_label(tag).is_none() && self.unlabeled_tags.insert(tag.byte()) {
            log::warn!("No label for tag {tag:?}, writing the raw tag instead");
        }
    }
}

impl<W: Write> BlockSink for TextBlockSink<W> {
    fn emit(&mut self, block: &Block) -> anyhow::Result<()> {
        self.warn_if_unlabeled(block.tag());
        writeln!(self.writer, "{}", block.record(&self.tag_table))
            .with_context(|| format!("Failed to write record for {block}"))
    }
}

impl<W> fmt::Debug for TextBlockSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextBlockSink")
            .field("tag_table", &self.tag_table)
            .field("unlabeled_tags", &self.unlabeled_tags)
            .finish_non_exhaustive()
    }
}

impl<S> SynchronizedSink<S> {
    pub fn new(sink: S) -> Self {
        Self {
            shared: Arc::new(Mutex::new(sink)),
        }
    }

    /// Calls the given closure with exclusive access to the shared sink.
    #[cfg(test)]
    pub(crate) fn with_locked<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.shared.lock())
    }

    /// Returns the shared sink if this is the only remaining handle to it,
    /// otherwise gives the handle back.
    ///
    /// # Errors
    /// Returns the handle itself if other handles to the sink still exist.
    pub fn try_into_inner(self) -> Result<S, Self> {
        Arc::try_unwrap(self.shared)
            .map(Mutex::into_inner)
            .map_err(|shared| Self { shared })
    }
}

impl<S: BlockSink> BlockSink for SynchronizedSink<S> {
    fn emit(&mut self, block: &Block) -> anyhow::Result<()> {
        self.shared.lock().emit(block)
    }
}

impl<S> RecordingSink<S> {
    /// Wraps the given sink. Copies of the forwarded blocks are only kept if
    /// `record` is `true`.
    pub fn new(inner: S, record: bool) -> Self {
        Self {
            inner,
            recorded: record.then(Vec::new),
        }
    }

    /// Returns the wrapped sink and the recorded blocks, if recording.
    pub fn into_parts(self) -> (S, Option<Vec<Block>>) {
        (self.inner, self.recorded)
    }
}

impl<S: BlockSink> BlockSink for RecordingSink<S> {
    fn emit(&mut self, block: &Block) -> anyhow::Result<()> {
        self.inner.emit(block)?;
        if let Some(recorded) = &mut self.recorded {
            recorded.push(*block);
        }
        Ok(())
    }
}

impl<S> Clone for SynchronizedSink<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for SynchronizedSink<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizedSink")
            .field("shared", &self.shared)
            .finish()
    }
}
