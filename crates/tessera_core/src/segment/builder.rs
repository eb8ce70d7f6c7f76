//! Open segments.

use crate::block::BlockStore;
use crate::column::{DataBlock, LogicalType};
use crate::error::{CoreError, CoreResult};
use crate::segment::entry::BlockEntry;
use crate::types::SegmentId;

/// A segment that has been fully written but not yet published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSegment {
    /// Segment identifier.
    pub id: SegmentId,
    /// Blocks in offset order.
    pub blocks: Vec<BlockEntry>,
    /// Total rows.
    pub row_count: u32,
}

/// Accumulates rows for one segment.
///
/// Rows are buffered into a block of `block_capacity` rows; every full block
/// is encoded and written to block storage immediately. [`seal`](Self::seal)
/// writes the final partial block.
#[derive(Debug)]
pub struct SegmentBuilder {
    id: SegmentId,
    types: Vec<LogicalType>,
    block_capacity: usize,
    segment_capacity: usize,
    buffer: DataBlock,
    blocks: Vec<BlockEntry>,
    flushed_rows: usize,
}

impl SegmentBuilder {
    /// Opens an empty segment.
    #[must_use]
    pub fn new(
        id: SegmentId,
        types: Vec<LogicalType>,
        block_capacity: usize,
        segment_capacity: usize,
    ) -> Self {
        let buffer = DataBlock::with_capacity(&types, block_capacity);
        Self {
            id,
            types,
            block_capacity,
            segment_capacity,
            buffer,
            blocks: Vec::new(),
            flushed_rows: 0,
        }
    }

    /// Returns the segment id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Returns the rows appended so far.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.flushed_rows + self.buffer.row_count()
    }

    /// Returns how many more rows fit.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.segment_capacity - self.row_count()
    }

    /// Returns whether the segment is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Appends up to `len` rows of `src` starting at `start`.
    ///
    /// Returns how many rows were taken, which is less than `len` only when
    /// the segment filled up.
    pub fn append(
        &mut self,
        store: &BlockStore,
        src: &DataBlock,
        start: usize,
        len: usize,
    ) -> CoreResult<usize> {
        let take = len.min(self.remaining());
        let mut copied = 0;
        while copied < take {
            let room = self.block_capacity - self.buffer.row_count();
            let n = room.min(take - copied);
            self.buffer.extend_from(src, start + copied, n)?;
            copied += n;
            if self.buffer.row_count() == self.block_capacity {
                self.flush_block(store)?;
            }
        }
        Ok(take)
    }

    /// Writes any buffered rows and returns the sealed segment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if no row was ever appended.
    pub fn seal(mut self, store: &BlockStore) -> CoreResult<SealedSegment> {
        if !self.buffer.is_empty() {
            self.flush_block(store)?;
        }
        if self.blocks.is_empty() {
            return Err(CoreError::invalid_operation(format!(
                "segment {} sealed with no rows",
                self.id
            )));
        }
        let row_count = u32::try_from(self.flushed_rows)
            .map_err(|_| CoreError::invariant("segment row count exceeds u32"))?;
        Ok(SealedSegment {
            id: self.id,
            blocks: self.blocks,
            row_count,
        })
    }

    fn flush_block(&mut self, store: &BlockStore) -> CoreResult<()> {
        let mut block = std::mem::replace(
            &mut self.buffer,
            DataBlock::with_capacity(&self.types, self.block_capacity),
        );
        block.finalize();
        let handle = store.write_block(&block)?;
        let block_id = u32::try_from(self.blocks.len())
            .map_err(|_| CoreError::invariant("too many blocks in one segment"))?;
        let start_offset = u32::try_from(self.flushed_rows)
            .map_err(|_| CoreError::invariant("segment row count exceeds u32"))?;
        self.blocks.push(BlockEntry {
            block_id,
            start_offset,
            handle,
        });
        self.flushed_rows += block.row_count();
        Ok(())
    }
}
