//! Database statistics.
//!
//! Counters are updated by the transaction manager, block storage and the
//! compaction processor, and can be read while operations are in progress.
//!
//! ```rust,ignore
//! use tessera_core::Database;
//!
//! let db = Database::open_in_memory()?;
//! // ... import, delete, compact ...
//! let snap = db.stats().snapshot();
//! println!("compactions: {}", snap.compactions_committed);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Database statistics.
///
/// All values are monotonically increasing counters.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    // Transactions
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    conflicts: AtomicU64,

    // Rows
    rows_imported: AtomicU64,
    rows_deleted: AtomicU64,

    // Segments
    segments_created: AtomicU64,
    segments_deprecated: AtomicU64,
    segments_reclaimed: AtomicU64,

    // Compaction
    compactions_committed: AtomicU64,
    compactions_abandoned: AtomicU64,

    // Block storage
    blocks_written: AtomicU64,
    blocks_read: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
}

impl DatabaseStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rows_imported(&self, rows: u64) {
        self.rows_imported.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_rows_deleted(&self, rows: u64) {
        self.rows_deleted.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_segments_created(&self, count: u64) {
        self.segments_created.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_segments_deprecated(&self, count: u64) {
        self.segments_deprecated.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_segments_reclaimed(&self, count: u64) {
        self.segments_reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction_commit(&self) {
        self.compactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction_abandoned(&self) {
        self.compactions_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_block_write(&self, bytes: u64) {
        self.blocks_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_block_read(&self, bytes: u64) {
        self.blocks_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of transactions started.
    pub fn transactions_started(&self) -> u64 {
        self.transactions_started.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions rolled back, explicitly or after a
    /// failed commit.
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns the number of commits rejected with a conflict.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Returns the number of rows made visible by committed imports.
    pub fn rows_imported(&self) -> u64 {
        self.rows_imported.load(Ordering::Relaxed)
    }

    /// Returns the number of rows deleted by committed transactions.
    pub fn rows_deleted(&self) -> u64 {
        self.rows_deleted.load(Ordering::Relaxed)
    }

    /// Returns the number of segments published by commits.
    pub fn segments_created(&self) -> u64 {
        self.segments_created.load(Ordering::Relaxed)
    }

    /// Returns the number of segments retired by compaction.
    pub fn segments_deprecated(&self) -> u64 {
        self.segments_deprecated.load(Ordering::Relaxed)
    }

    /// Returns the number of deprecated segments dropped by cleanup.
    pub fn segments_reclaimed(&self) -> u64 {
        self.segments_reclaimed.load(Ordering::Relaxed)
    }

    /// Returns the number of committed compactions.
    pub fn compactions_committed(&self) -> u64 {
        self.compactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of compactions that returned no timestamp.
    pub fn compactions_abandoned(&self) -> u64 {
        self.compactions_abandoned.load(Ordering::Relaxed)
    }

    /// Returns the number of blocks written to block storage.
    pub fn blocks_written(&self) -> u64 {
        self.blocks_written.load(Ordering::Relaxed)
    }

    /// Returns the number of blocks read from block storage.
    pub fn blocks_read(&self) -> u64 {
        self.blocks_read.load(Ordering::Relaxed)
    }

    /// Returns the total encoded bytes written.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Returns the total encoded bytes read.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started(),
            transactions_committed: self.transactions_committed(),
            transactions_rolled_back: self.transactions_rolled_back(),
            conflicts: self.conflicts(),
            rows_imported: self.rows_imported(),
            rows_deleted: self.rows_deleted(),
            segments_created: self.segments_created(),
            segments_deprecated: self.segments_deprecated(),
            segments_reclaimed: self.segments_reclaimed(),
            compactions_committed: self.compactions_committed(),
            compactions_abandoned: self.compactions_abandoned(),
            blocks_written: self.blocks_written(),
            blocks_read: self.blocks_read(),
            bytes_written: self.bytes_written(),
            bytes_read: self.bytes_read(),
        }
    }
}

/// A point-in-time copy of [`DatabaseStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Transactions started.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions rolled back.
    pub transactions_rolled_back: u64,
    /// Commits rejected with a conflict.
    pub conflicts: u64,
    /// Rows imported.
    pub rows_imported: u64,
    /// Rows deleted.
    pub rows_deleted: u64,
    /// Segments created.
    pub segments_created: u64,
    /// Segments deprecated.
    pub segments_deprecated: u64,
    /// Segments reclaimed.
    pub segments_reclaimed: u64,
    /// Compactions committed.
    pub compactions_committed: u64,
    /// Compactions abandoned.
    pub compactions_abandoned: u64,
    /// Blocks written.
    pub blocks_written: u64,
    /// Blocks read.
    pub blocks_read: u64,
    /// Bytes written.
    pub bytes_written: u64,
    /// Bytes read.
    pub bytes_read: u64,
}
