//! Multi-segment writer.

use crate::block::BlockStore;
use crate::column::{DataBlock, LogicalType};
use crate::error::CoreResult;
use crate::segment::builder::{SealedSegment, SegmentBuilder};
use crate::types::SegmentId;

/// Writes a stream of rows into as many segments as it takes.
///
/// Every produced segment is full except the last, so output row `n` of the
/// stream lands in segment `n / segment_capacity` at offset
/// `n % segment_capacity`.
pub struct SegmentWriter<'a, F> {
    store: &'a BlockStore,
    types: Vec<LogicalType>,
    block_capacity: usize,
    segment_capacity: usize,
    allocate_id: F,
    current: Option<SegmentBuilder>,
    sealed: Vec<SealedSegment>,
    rows_written: u64,
}

impl<'a, F> SegmentWriter<'a, F>
where
    F: FnMut() -> CoreResult<SegmentId>,
{
    /// Creates a writer. `allocate_id` is called once per new segment.
    pub fn new(
        store: &'a BlockStore,
        types: Vec<LogicalType>,
        block_capacity: usize,
        segment_capacity: usize,
        allocate_id: F,
    ) -> Self {
        Self {
            store,
            types,
            block_capacity,
            segment_capacity,
            allocate_id,
            current: None,
            sealed: Vec::new(),
            rows_written: 0,
        }
    }

    /// Returns the number of rows written so far.
    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Appends rows `start..start + len` of `src`.
    pub fn append(&mut self, src: &DataBlock, start: usize, len: usize) -> CoreResult<()> {
        let mut done = 0;
        while done < len {
            let builder = match self.current.take() {
                Some(b) if !b.is_full() => b,
                Some(full) => {
                    self.sealed.push(full.seal(self.store)?);
                    self.open()?
                }
                None => self.open()?,
            };
            let builder = self.current.insert(builder);
            done += builder.append(self.store, src, start + done, len - done)?;
        }
        self.rows_written += len as u64;
        Ok(())
    }

    /// Appends every row of `src`.
    pub fn append_block(&mut self, src: &DataBlock) -> CoreResult<()> {
        self.append(src, 0, src.row_count())
    }

    /// Seals the open segment and returns all segments in write order.
    pub fn finish(mut self) -> CoreResult<Vec<SealedSegment>> {
        if let Some(builder) = self.current.take() {
            if builder.row_count() > 0 {
                self.sealed.push(builder.seal(self.store)?);
            }
        }
        Ok(self.sealed)
    }

    fn open(&mut self) -> CoreResult<SegmentBuilder> {
        let id = (self.allocate_id)()?;
        Ok(SegmentBuilder::new(
            id,
            self.types.clone(),
            self.block_capacity,
            self.segment_capacity,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Value;
    use crate::stats::DatabaseStats;
    use std::sync::Arc;
    use tessera_storage::InMemoryBackend;

    fn rows(n: i32) -> DataBlock {
        let mut block = DataBlock::new(&[LogicalType::Integer]);
        for i in 0..n {
            block.append_row(vec![Value::Integer(i)]).unwrap();
        }
        block
    }

    #[test]
    fn rolls_over_to_new_segments() {
        let store = BlockStore::new(
            Box::new(InMemoryBackend::new()),
            Arc::new(DatabaseStats::new()),
        );
        let mut next = 10u32;
        let mut writer = SegmentWriter::new(&store, vec![LogicalType::Integer], 2, 4, || {
            next += 1;
            Ok(SegmentId::new(next))
        });

        writer.append_block(&rows(3)).unwrap();
        writer.append_block(&rows(6)).unwrap();
        assert_eq!(writer.rows_written(), 9);

        let segments = writer.finish().unwrap();
        let ids: Vec<u32> = segments.iter().map(|s| s.id.as_u32()).collect();
        let counts: Vec<u32> = segments.iter().map(|s| s.row_count).collect();
        assert_eq!(ids, vec![11, 12, 13]);
        assert_eq!(counts, vec![4, 4, 1]);
    }

    #[test]
    fn nothing_written_yields_no_segments() {
        let store = BlockStore::new(
            Box::new(InMemoryBackend::new()),
            Arc::new(DatabaseStats::new()),
        );
        let writer = SegmentWriter::new(&store, vec![LogicalType::Integer], 2, 4, || {
            Ok(SegmentId::new(0))
        });
        assert!(writer.finish().unwrap().is_empty());
    }
}
