//! Table version state.
//!
//! A [`TableState`] is one table *instance*: its schema, its lifetime in
//! commit timestamps, and the arena of every segment it has published. All
//! mutation happens inside the transaction manager's commit critical section;
//! readers filter by their snapshot timestamp.

use crate::catalog::TableDef;
use crate::error::{CoreError, CoreResult};
use crate::segment::{SegmentEntry, SegmentInfo};
use crate::types::{SegmentId, TableId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Versioned state of one table instance.
#[derive(Debug)]
pub struct TableState {
    table_id: TableId,
    def: Arc<TableDef>,
    create_ts: Timestamp,
    drop_ts: Option<Timestamp>,
    segments: BTreeMap<SegmentId, SegmentEntry>,
    next_segment_id: AtomicU32,
}

impl TableState {
    /// Creates an empty table instance committed at `create_ts`.
    pub fn new(table_id: TableId, def: Arc<TableDef>, create_ts: Timestamp) -> Self {
        Self {
            table_id,
            def,
            create_ts,
            drop_ts: None,
            segments: BTreeMap::new(),
            next_segment_id: AtomicU32::new(0),
        }
    }

    /// Returns the instance identity.
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Returns the schema.
    pub fn def(&self) -> &Arc<TableDef> {
        &self.def
    }

    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Returns the commit timestamp of the creating transaction.
    pub fn create_ts(&self) -> Timestamp {
        self.create_ts
    }

    /// Returns the commit timestamp of the dropping transaction, if dropped.
    pub fn drop_ts(&self) -> Option<Timestamp> {
        self.drop_ts
    }

    /// Returns whether a snapshot at `ts` sees this instance.
    pub fn is_live_at(&self, ts: Timestamp) -> bool {
        self.create_ts <= ts && self.drop_ts.map_or(true, |d| d > ts)
    }

    /// Returns whether the instance has been dropped by a committed transaction.
    pub fn is_dropped(&self) -> bool {
        self.drop_ts.is_some()
    }

    pub(crate) fn mark_dropped(&mut self, ts: Timestamp) {
        self.drop_ts = Some(ts);
    }

    /// Hands out the next segment id. Ids are never reused, even when the
    /// allocating transaction rolls back.
    pub fn allocate_segment_id(&self) -> SegmentId {
        SegmentId::new(self.next_segment_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the id the next allocation will return.
    pub fn next_segment_id(&self) -> SegmentId {
        SegmentId::new(self.next_segment_id.load(Ordering::Relaxed))
    }

    /// Returns a segment by id regardless of visibility.
    pub fn segment(&self, id: SegmentId) -> Option<&SegmentEntry> {
        self.segments.get(&id)
    }

    pub(crate) fn segment_mut(&mut self, id: SegmentId) -> Option<&mut SegmentEntry> {
        self.segments.get_mut(&id)
    }

    /// Returns a segment if a snapshot at `ts` sees it.
    pub fn visible_segment(&self, id: SegmentId, ts: Timestamp) -> Option<&SegmentEntry> {
        self.segment(id).filter(|s| s.is_visible(ts))
    }

    /// Iterates over segments visible at `ts`, in id order.
    pub fn visible_segments(&self, ts: Timestamp) -> impl Iterator<Item = &SegmentEntry> {
        self.segments.values().filter(move |s| s.is_visible(ts))
    }

    /// Iterates over every tracked segment, in id order.
    pub fn segments(&self) -> impl Iterator<Item = &SegmentEntry> {
        self.segments.values()
    }

    /// Publishes a segment.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the id is already taken.
    pub(crate) fn insert_segment(&mut self, entry: SegmentEntry) -> CoreResult<()> {
        if self.segments.contains_key(&entry.id) {
            return Err(CoreError::invariant(format!(
                "segment {} published twice in {}",
                entry.id, self.table_id
            )));
        }
        self.segments.insert(entry.id, entry);
        Ok(())
    }

    /// Drops deprecated segments whose `deprecate_ts` is older than `horizon`.
    ///
    /// Returns how many were dropped.
    pub(crate) fn reclaim(&mut self, horizon: Timestamp) -> usize {
        let before = self.segments.len();
        self.segments
            .retain(|_, s| !s.deprecate_ts.is_some_and(|d| d < horizon));
        before - self.segments.len()
    }

    /// Summarizes the table as seen at `ts`.
    pub fn info(&self, ts: Timestamp) -> TableInfo {
        let mut info = TableInfo {
            table_id: self.table_id,
            name: self.def.name.clone(),
            segment_count: 0,
            block_count: 0,
            row_count: 0,
        };
        for segment in self.visible_segments(ts) {
            info.segment_count += 1;
            info.block_count += segment.blocks.len();
            info.row_count += segment.live_row_count(ts);
        }
        info
    }

    /// Describes every visible segment at `ts`.
    pub fn segment_infos(&self, ts: Timestamp) -> Vec<SegmentInfo> {
        self.visible_segments(ts).map(|s| s.info(ts)).collect()
    }
}

/// Public description of a table at a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Instance identity.
    pub table_id: TableId,
    /// Table name.
    pub name: String,
    /// Visible segments.
    pub segment_count: usize,
    /// Row blocks across visible segments.
    pub block_count: usize,
    /// Live rows across visible segments.
    pub row_count: u64,
}
