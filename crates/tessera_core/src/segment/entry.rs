//! Committed segment metadata.

use crate::block::BlockHandle;
use crate::error::{CoreError, CoreResult};
use crate::segment::builder::SealedSegment;
use crate::types::{SegmentId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status of a segment.
///
/// The only transition is `Active -> Deprecated`, taken when a compaction
/// that consumed the segment commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentStatus {
    /// Readable by snapshots at or after its create timestamp.
    Active,
    /// Replaced by a compaction; only older snapshots still see it.
    Deprecated,
}

impl fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Deprecated => f.write_str("deprecated"),
        }
    }
}

/// One stored row block of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    /// Position of the block inside its segment.
    pub block_id: u32,
    /// Segment offset of the block's first row.
    pub start_offset: u32,
    /// Where the encoded block lives.
    pub handle: BlockHandle,
}

impl BlockEntry {
    /// Returns the number of rows in the block.
    #[must_use]
    pub fn row_count(&self) -> u32 {
        self.handle.row_count
    }

    /// Returns one past the segment offset of the block's last row.
    #[must_use]
    pub fn end_offset(&self) -> u32 {
        self.start_offset + self.handle.row_count
    }
}

/// Per-row delete history of a segment: offset to delete commit timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteBitmap {
    deletes: BTreeMap<u32, Timestamp>,
}

impl DeleteBitmap {
    /// Creates an empty bitmap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a delete of `offset` committed at `ts`.
    ///
    /// Returns `false` and keeps the earlier timestamp if the row was
    /// already deleted.
    pub fn mark(&mut self, offset: u32, ts: Timestamp) -> bool {
        match self.deletes.entry(offset) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(ts);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Returns the commit timestamp of the delete of `offset`, if any.
    #[must_use]
    pub fn deleted_at(&self, offset: u32) -> Option<Timestamp> {
        self.deletes.get(&offset).copied()
    }

    /// Returns whether `offset` is deleted as of snapshot `ts`.
    #[must_use]
    pub fn is_deleted_at(&self, offset: u32, ts: Timestamp) -> bool {
        self.deleted_at(offset).is_some_and(|d| d <= ts)
    }

    /// Returns how many rows are deleted as of snapshot `ts`.
    #[must_use]
    pub fn deleted_count_at(&self, ts: Timestamp) -> usize {
        self.deletes.values().filter(|&&d| d <= ts).count()
    }

    /// Iterates over deletes committed strictly after `ts`, in offset order.
    pub fn deleted_after(&self, ts: Timestamp) -> impl Iterator<Item = (u32, Timestamp)> + '_ {
        self.deletes
            .iter()
            .filter(move |(_, &d)| d > ts)
            .map(|(&o, &d)| (o, d))
    }

    /// Returns the total number of recorded deletes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deletes.len()
    }

    /// Returns whether no delete has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty()
    }

    fn max_offset(&self) -> Option<u32> {
        self.deletes.keys().next_back().copied()
    }
}

/// A committed segment as tracked by its table.
///
/// Everything except `status`, `deprecate_ts` and `deletes` is fixed when the
/// segment is published.
#[derive(Debug, Clone)]
pub struct SegmentEntry {
    /// Segment identifier.
    pub id: SegmentId,
    /// Blocks in offset order.
    pub blocks: Vec<BlockEntry>,
    /// Rows appended to the segment, deleted or not.
    pub row_count: u32,
    /// Commit timestamp of the transaction that published the segment.
    pub create_ts: Timestamp,
    /// Lifecycle status.
    pub status: SegmentStatus,
    /// Commit timestamp of the compaction that deprecated the segment.
    pub deprecate_ts: Option<Timestamp>,
    /// Delete history.
    pub deletes: DeleteBitmap,
}

impl SegmentEntry {
    /// Publishes a sealed segment at `create_ts`.
    #[must_use]
    pub fn from_sealed(sealed: SealedSegment, create_ts: Timestamp) -> Self {
        Self {
            id: sealed.id,
            blocks: sealed.blocks,
            row_count: sealed.row_count,
            create_ts,
            status: SegmentStatus::Active,
            deprecate_ts: None,
            deletes: DeleteBitmap::new(),
        }
    }

    /// Returns whether the segment is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SegmentStatus::Active
    }

    /// Returns whether the segment has been deprecated as of snapshot `ts`.
    #[must_use]
    pub fn is_deprecated_at(&self, ts: Timestamp) -> bool {
        self.deprecate_ts.is_some_and(|d| d <= ts)
    }

    /// Returns whether a snapshot at `ts` sees this segment.
    #[must_use]
    pub fn is_visible(&self, ts: Timestamp) -> bool {
        self.create_ts <= ts && !self.is_deprecated_at(ts)
    }

    /// Returns the number of live rows as of snapshot `ts`.
    #[must_use]
    pub fn live_row_count(&self, ts: Timestamp) -> u64 {
        u64::from(self.row_count) - self.deletes.deleted_count_at(ts) as u64
    }

    /// Moves the segment to `Deprecated` at `ts`.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the segment is already deprecated or
    /// `ts` does not follow its create timestamp.
    pub fn deprecate(&mut self, ts: Timestamp) -> CoreResult<()> {
        if !self.is_active() {
            return Err(CoreError::invariant(format!(
                "segment {} deprecated twice",
                self.id
            )));
        }
        if ts <= self.create_ts {
            return Err(CoreError::invariant(format!(
                "segment {} deprecated at {ts}, created at {}",
                self.id, self.create_ts
            )));
        }
        self.status = SegmentStatus::Deprecated;
        self.deprecate_ts = Some(ts);
        Ok(())
    }

    /// Checks the structural invariants of the entry.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` describing the first broken invariant.
    pub fn check_invariants(&self) -> CoreResult<()> {
        let mut expected_start = 0u32;
        for (idx, block) in self.blocks.iter().enumerate() {
            if block.block_id as usize != idx || block.start_offset != expected_start {
                return Err(CoreError::invariant(format!(
                    "segment {} block {idx} is out of order",
                    self.id
                )));
            }
            expected_start = block.end_offset();
        }
        if expected_start != self.row_count {
            return Err(CoreError::invariant(format!(
                "segment {} blocks hold {expected_start} rows, entry says {}",
                self.id, self.row_count
            )));
        }
        if self
            .deletes
            .max_offset()
            .is_some_and(|o| o >= self.row_count)
        {
            return Err(CoreError::invariant(format!(
                "segment {} has a delete past its last row",
                self.id
            )));
        }
        match (self.status, self.deprecate_ts) {
            (SegmentStatus::Active, None) => Ok(()),
            (SegmentStatus::Deprecated, Some(ts)) if ts > self.create_ts => Ok(()),
            _ => Err(CoreError::invariant(format!(
                "segment {} has status {} with deprecate_ts {:?}",
                self.id, self.status, self.deprecate_ts
            ))),
        }
    }

    /// Describes the segment as seen at snapshot `ts`.
    #[must_use]
    pub fn info(&self, ts: Timestamp) -> SegmentInfo {
        SegmentInfo {
            segment_id: self.id,
            status: if self.is_deprecated_at(ts) {
                SegmentStatus::Deprecated
            } else {
                SegmentStatus::Active
            },
            row_count: u64::from(self.row_count),
            actual_row_count: self.live_row_count(ts),
            block_count: self.blocks.len(),
            create_ts: Some(self.create_ts),
            deprecate_ts: self.deprecate_ts.filter(|&d| d <= ts),
        }
    }
}

/// Public description of a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Segment identifier.
    pub segment_id: SegmentId,
    /// Status as seen by the asking snapshot.
    pub status: SegmentStatus,
    /// Rows appended to the segment.
    pub row_count: u64,
    /// Rows not deleted as of the asking snapshot.
    pub actual_row_count: u64,
    /// Number of row blocks.
    pub block_count: usize,
    /// Commit timestamp, or `None` for a segment the asking transaction has
    /// not committed yet.
    pub create_ts: Option<Timestamp>,
    /// Deprecation timestamp, if visible to the asking snapshot.
    pub deprecate_ts: Option<Timestamp>,
}
