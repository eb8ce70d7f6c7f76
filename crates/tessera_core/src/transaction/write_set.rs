//! Buffered transaction writes.
//!
//! Nothing a transaction does before commit touches table version state.
//! Each operation is buffered as a [`WriteOp`] carrying exactly what commit
//! validation needs to detect conflicts and what apply needs to replay it.

use crate::catalog::{ConflictPolicy, TableDef};
use crate::error::{CoreError, CoreResult};
use crate::segment::SealedSegment;
use crate::types::{SegmentId, TableId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One buffered write.
#[derive(Debug)]
pub(crate) enum WriteOp {
    CreateTable {
        database: String,
        def: Arc<TableDef>,
        policy: ConflictPolicy,
    },
    DropTable {
        table_id: TableId,
        name: String,
        policy: ConflictPolicy,
    },
    Import(ImportWrite),
    Delete(DeleteWrite),
    Compact(CompactWrite),
}

/// Segments written by an import, not yet published.
#[derive(Debug)]
pub(crate) struct ImportWrite {
    pub table_id: TableId,
    pub segments: Vec<SealedSegment>,
    pub rows: u64,
}

/// Rows a transaction deletes from one table instance.
#[derive(Debug)]
pub(crate) struct DeleteWrite {
    pub table_id: TableId,
    pub rows: BTreeMap<SegmentId, BTreeSet<u32>>,
}

impl DeleteWrite {
    pub(crate) fn contains(&self, segment_id: SegmentId, offset: u32) -> bool {
        self.rows
            .get(&segment_id)
            .is_some_and(|offsets| offsets.contains(&offset))
    }
}

/// One compaction source: which of its rows were copied and where they
/// start in the output stream.
#[derive(Debug, Clone)]
pub(crate) struct CompactSource {
    pub segment_id: SegmentId,
    pub row_count: u32,
    /// Source offsets copied, ascending.
    pub copied: Vec<u32>,
    /// Output stream position of `copied[0]`.
    pub output_start: u64,
}

/// A compaction: sources to retire and the outputs replacing them.
#[derive(Debug)]
pub(crate) struct CompactWrite {
    pub table_id: TableId,
    pub sources: Vec<CompactSource>,
    pub outputs: Vec<SealedSegment>,
    pub segment_capacity: u32,
}

impl CompactWrite {
    pub(crate) fn rows_copied(&self) -> u64 {
        self.sources.iter().map(|s| s.copied.len() as u64).sum()
    }

    /// Maps a copied source row to its output segment and offset.
    ///
    /// Returns `None` if the row was not copied.
    pub(crate) fn locate(&self, source: &CompactSource, offset: u32) -> Option<(SegmentId, u32)> {
        let pos = source.copied.binary_search(&offset).ok()? as u64;
        let position = source.output_start + pos;
        let cap = u64::from(self.segment_capacity);
        let output = self.outputs.get(usize::try_from(position / cap).ok()?)?;
        let out_offset = u32::try_from(position % cap).ok()?;
        (out_offset < output.row_count).then_some((output.id, out_offset))
    }

    /// Checks that sources and outputs describe the same rows.
    pub(crate) fn check(&self) -> CoreResult<()> {
        let mut expected_start = 0u64;
        for source in &self.sources {
            if source.output_start != expected_start {
                return Err(CoreError::invariant(format!(
                    "compaction source {} starts at output row {}, expected {expected_start}",
                    source.segment_id, source.output_start
                )));
            }
            let ascending = source.copied.windows(2).all(|w| w[0] < w[1]);
            let in_range = source.copied.last().map_or(true, |&o| o < source.row_count);
            if !ascending || !in_range {
                return Err(CoreError::invariant(format!(
                    "compaction source {} has an invalid copy map",
                    source.segment_id
                )));
            }
            expected_start += source.copied.len() as u64;
        }

        let output_rows: u64 = self.outputs.iter().map(|o| u64::from(o.row_count)).sum();
        if output_rows != expected_start {
            return Err(CoreError::invariant(format!(
                "compaction copied {expected_start} rows but wrote {output_rows}"
            )));
        }
        if let Some((_, full)) = self.outputs.split_last() {
            if let Some(short) = full.iter().find(|o| o.row_count != self.segment_capacity) {
                return Err(CoreError::invariant(format!(
                    "compaction output {} holds {} rows, expected {}",
                    short.id, short.row_count, self.segment_capacity
                )));
            }
        }
        Ok(())
    }
}
