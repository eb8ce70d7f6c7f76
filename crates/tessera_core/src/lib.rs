//! # Tessera Core
//!
//! Transactional segment store for Tessera.
//!
//! This crate provides:
//! - Typed column blocks and a checksummed block codec
//! - Immutable segments with per-row delete history
//! - Snapshot-isolated transactions with first-committer-wins conflicts
//! - A compaction engine that merges small segments while imports and
//!   deletes keep running against the same table

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod block;
pub mod catalog;
pub mod column;
pub mod compaction;
mod config;
mod database;
mod error;
pub mod segment;
mod stats;
pub mod table;
pub mod transaction;
mod types;

pub use catalog::{ColumnDef, ConflictPolicy, TableDef, DEFAULT_DATABASE};
pub use column::{ColumnVector, DataBlock, LogicalType, Value};
pub use compaction::{
    CompactOutcome, CompactSummary, CompactionPolicy, CompactionProcessor, SegmentSelection,
};
pub use config::{Config, DEFAULT_BLOCK_CAPACITY, DEFAULT_SEGMENT_CAPACITY};
pub use database::{Database, BLOCK_FILE_NAME};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use segment::{SegmentInfo, SegmentStatus};
pub use stats::{DatabaseStats, StatsSnapshot};
pub use table::TableInfo;
pub use transaction::{
    CleanupResult, Transaction, TransactionKind, TransactionManager, TransactionState,
};
pub use types::{RowId, SegmentId, TableId, Timestamp, TransactionId};
pub use tessera_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};
