//! Database facade.

use crate::compaction::{CompactionProcessor, SegmentSelection};
use crate::config::Config;
use crate::error::CoreResult;
use crate::stats::StatsSnapshot;
use crate::transaction::{CleanupResult, Transaction, TransactionKind, TransactionManager};
use crate::types::Timestamp;
use std::path::Path;
use tessera_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tracing::info;

/// File holding the row blocks of a database opened with [`Database::open`].
pub const BLOCK_FILE_NAME: &str = "blocks.dat";

/// The main database handle.
///
/// `Database` bundles a [`TransactionManager`] with a
/// [`CompactionProcessor`] over the same state. Table version state lives in
/// memory for the lifetime of the handle; only row blocks go to the storage
/// backend.
///
/// ```rust,ignore
/// use tessera_core::{Database, TransactionKind};
///
/// let db = Database::open_in_memory()?;
/// db.transaction("load", |txn| txn.import("default_db", "events", blocks))?;
/// db.compact("default_db", "events", SegmentSelection::All);
/// ```
pub struct Database {
    manager: TransactionManager,
    compaction: CompactionProcessor,
}

impl Database {
    /// Opens a database whose blocks are kept in memory.
    ///
    /// # Errors
    ///
    /// Never fails with the default configuration.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(Config::default())
    }

    /// Opens an in-memory database with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unusable configuration.
    pub fn open_in_memory_with_config(config: Config) -> CoreResult<Self> {
        Self::open_with_backend(config, Box::new(InMemoryBackend::new()))
    }

    /// Opens a database over a caller-provided block backend.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unusable configuration.
    pub fn open_with_backend(config: Config, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let backend_name = backend.name();
        let manager = TransactionManager::new(config, backend)?;
        info!(
            backend = backend_name,
            block_capacity = manager.config().block_capacity,
            segment_capacity = manager.config().segment_capacity,
            "database opened"
        );
        Ok(Self {
            compaction: CompactionProcessor::new(manager.clone()),
            manager,
        })
    }

    /// Opens a database that writes its blocks under directory `path`.
    ///
    /// The directory is created if missing.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the block file cannot be opened, or
    /// `InvalidArgument` for an unusable configuration.
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(&path.join(BLOCK_FILE_NAME))?;
        Self::open_with_backend(config, Box::new(backend))
    }

    /// Returns the transaction manager.
    #[must_use]
    pub fn txn_manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Returns the compaction processor.
    #[must_use]
    pub fn compaction(&self) -> &CompactionProcessor {
        &self.compaction
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        self.manager.config()
    }

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns `ManagerShutDown` after [`shutdown`](Self::shutdown).
    pub fn begin(&self, name: impl Into<String>, kind: TransactionKind) -> CoreResult<Transaction> {
        self.manager.begin(name, kind)
    }

    /// Commits a transaction.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::commit`].
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<Timestamp> {
        self.manager.commit(txn)
    }

    /// Rolls back a transaction.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::rollback`].
    pub fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.manager.rollback(txn)
    }

    /// Executes a function within a normal transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back.
    ///
    /// # Errors
    ///
    /// The function's error, or the commit error.
    pub fn transaction<F, T>(&self, name: &str, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        let mut txn = self.begin(name, TransactionKind::Normal)?;
        match f(&mut txn) {
            Ok(value) => {
                self.commit(&mut txn)?;
                Ok(value)
            }
            Err(err) => {
                self.rollback(&mut txn)?;
                Err(err)
            }
        }
    }

    /// Compacts `selection` of `db.table`; see
    /// [`CompactionProcessor::manual_compact`].
    pub fn compact(&self, db: &str, table: &str, selection: SegmentSelection) -> Option<Timestamp> {
        self.compaction.manual_compact(db, table, selection, None)
    }

    /// Drops metadata no snapshot can see anymore.
    pub fn cleanup(&self) -> CleanupResult {
        self.manager.cleanup()
    }

    /// Returns the statistics counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.manager.stats().snapshot()
    }

    /// Stops accepting transactions and syncs block storage.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the sync fails.
    pub fn shutdown(&self) -> CoreResult<()> {
        self.manager.shutdown();
        self.manager.blocks().sync()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
