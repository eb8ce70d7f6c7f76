//! Transaction manager.

use crate::block::BlockStore;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::stats::DatabaseStats;
use crate::table::TableState;
use crate::transaction::commit;
use crate::transaction::state::{Transaction, TransactionKind, TransactionState};
use crate::types::{SegmentId, TableId, TransactionId, Timestamp};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tessera_storage::StorageBackend;
use tracing::{debug, info};

/// State shared by the manager and every transaction it hands out.
pub(crate) struct ManagerShared {
    pub(crate) config: Config,
    pub(crate) catalog: RwLock<Catalog>,
    pub(crate) blocks: BlockStore,
    pub(crate) stats: Arc<DatabaseStats>,
    /// Last issued timestamp.
    clock: AtomicU64,
    next_txid: AtomicU64,
    /// Serializes timestamp assignment, commit validation and apply.
    commit_lock: Mutex<()>,
    /// Running transactions and their begin timestamps.
    active: Mutex<BTreeMap<TransactionId, Timestamp>>,
    shut_down: AtomicBool,
}

impl ManagerShared {
    pub(crate) fn unregister(&self, id: TransactionId) {
        self.active.lock().remove(&id);
    }

    /// Allocates a segment id from a table instance.
    pub(crate) fn allocate_segment_id(&self, table_id: TableId) -> CoreResult<SegmentId> {
        self.catalog
            .read()
            .table(table_id)
            .map(TableState::allocate_segment_id)
            .ok_or_else(|| CoreError::invariant(format!("table {table_id} vanished while in use")))
    }
}

/// Outcome of [`TransactionManager::cleanup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    /// The horizon used.
    pub horizon: Timestamp,
    /// Deprecated segments dropped.
    pub segments_reclaimed: usize,
    /// Dropped table instances forgotten.
    pub tables_reclaimed: usize,
}

/// Hands out transactions and commits them.
///
/// ## Ordering
///
/// Begin and commit timestamps are drawn from one counter owned by the
/// manager. A commit validates its writes against the current table version
/// state, takes the next timestamp and applies its effects while holding the
/// commit lock, so commits are totally ordered and a snapshot at `T` sees
/// exactly the transactions committed at or before `T`.
///
/// ## Conflicts
///
/// The first committer wins. A losing commit is rolled back before the
/// conflict is returned, so a caller never has to clean up after it.
///
/// Cloning the manager is cheap; clones share all state.
#[derive(Clone)]
pub struct TransactionManager {
    shared: Arc<ManagerShared>,
}

impl TransactionManager {
    /// Creates a manager with an empty catalog over `backend`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is unusable.
    pub fn new(config: Config, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        config.validate()?;
        let stats = Arc::new(DatabaseStats::new());
        let blocks = BlockStore::new(backend, Arc::clone(&stats));
        Ok(Self {
            shared: Arc::new(ManagerShared {
                config,
                catalog: RwLock::new(Catalog::new()),
                blocks,
                stats,
                clock: AtomicU64::new(0),
                next_txid: AtomicU64::new(1),
                commit_lock: Mutex::new(()),
                active: Mutex::new(BTreeMap::new()),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns `ManagerShutDown` after [`shutdown`](Self::shutdown).
    pub fn begin(&self, name: impl Into<String>, kind: TransactionKind) -> CoreResult<Transaction> {
        if self.is_shut_down() {
            return Err(CoreError::ManagerShutDown);
        }
        let id = TransactionId::new(self.shared.next_txid.fetch_add(1, Ordering::SeqCst));

        // No commit is half-applied while the commit lock is held, so the
        // snapshot at this timestamp is complete.
        let begin_ts = {
            let _guard = self.shared.commit_lock.lock();
            let ts = Timestamp::new(self.shared.clock.fetch_add(1, Ordering::SeqCst) + 1);
            self.shared.active.lock().insert(id, ts);
            ts
        };

        let name = name.into();
        self.shared.stats.record_transaction_start();
        debug!(txn = %id, %name, %kind, %begin_ts, "transaction started");
        Ok(Transaction::new(
            id,
            name,
            kind,
            begin_ts,
            Arc::clone(&self.shared),
        ))
    }

    /// Commits a transaction and returns its commit timestamp.
    ///
    /// On any validation failure the transaction is rolled back before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the transaction is not running (nothing is
    ///   rolled back in that case)
    /// - `TransactionConflict` if a concurrent commit won
    /// - `TableExists` for a create that lost to a concurrent create under
    ///   [`ConflictPolicy::Error`](crate::catalog::ConflictPolicy::Error)
    /// - `InvariantViolation` if a write would break a segment invariant
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<Timestamp> {
        self.check_owner(txn)?;
        txn.ensure_running()?;

        match self.commit_inner(txn) {
            Ok(ts) => Ok(ts),
            Err(err) => {
                if err.is_conflict() {
                    self.shared.stats.record_conflict();
                }
                debug!(txn = %txn.id(), error = %err, "commit failed, rolling back");
                self.abort(txn);
                Err(err)
            }
        }
    }

    fn commit_inner(&self, txn: &mut Transaction) -> CoreResult<Timestamp> {
        if let Some(reason) = &txn.doomed {
            return Err(CoreError::conflict(txn.id(), reason.clone()));
        }
        let writes = std::mem::take(&mut txn.writes);
        let begin_ts = txn.begin_ts();

        let _guard = self.shared.commit_lock.lock();
        let commit_ts = Timestamp::new(self.shared.clock.load(Ordering::SeqCst) + 1);
        let effects = {
            let mut catalog = self.shared.catalog.write();
            let plan = commit::validate(&catalog, txn.id(), begin_ts, &writes)?;
            commit::apply(&mut catalog, writes, plan, commit_ts)?
        };
        self.shared.clock.store(commit_ts.as_u64(), Ordering::SeqCst);
        self.shared.unregister(txn.id());
        txn.mark_committed(commit_ts);

        let stats = &self.shared.stats;
        stats.record_transaction_commit();
        stats.record_rows_imported(effects.rows_imported);
        stats.record_rows_deleted(effects.rows_deleted);
        stats.record_segments_created(effects.segments_created);
        stats.record_segments_deprecated(effects.segments_deprecated);
        for _ in 0..effects.compactions {
            stats.record_compaction_commit();
        }
        debug!(
            txn = %txn.id(),
            %begin_ts,
            %commit_ts,
            rows_imported = effects.rows_imported,
            rows_deleted = effects.rows_deleted,
            segments_created = effects.segments_created,
            segments_deprecated = effects.segments_deprecated,
            carried_deletes = effects.carried_deletes,
            "transaction committed"
        );
        Ok(commit_ts)
    }

    /// Rolls back a transaction, discarding its buffered writes.
    ///
    /// Rolling back an already rolled back transaction is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a committed transaction.
    pub fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.check_owner(txn)?;
        match txn.state() {
            TransactionState::RolledBack => Ok(()),
            TransactionState::Committed => Err(CoreError::invalid_operation(format!(
                "cannot roll back committed transaction {}",
                txn.id()
            ))),
            TransactionState::Running => {
                self.abort(txn);
                Ok(())
            }
        }
    }

    fn abort(&self, txn: &mut Transaction) {
        txn.mark_rolled_back();
        self.shared.unregister(txn.id());
        self.shared.stats.record_transaction_rollback();
        debug!(txn = %txn.id(), "transaction rolled back");
    }

    fn check_owner(&self, txn: &Transaction) -> CoreResult<()> {
        if Arc::ptr_eq(&txn.shared, &self.shared) {
            Ok(())
        } else {
            Err(CoreError::invalid_argument(format!(
                "transaction {} belongs to another manager",
                txn.id()
            )))
        }
    }

    /// Returns the last issued timestamp.
    #[must_use]
    pub fn current_ts(&self) -> Timestamp {
        Timestamp::new(self.shared.clock.load(Ordering::SeqCst))
    }

    /// Returns the number of running transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared.active.lock().len()
    }

    /// Returns the garbage-collection horizon: the oldest begin timestamp
    /// among running transactions, or one past the current timestamp when
    /// none is running.
    ///
    /// A deprecated segment with `deprecate_ts < gc_horizon()` is invisible
    /// to every present and future snapshot.
    #[must_use]
    pub fn gc_horizon(&self) -> Timestamp {
        let active = self.shared.active.lock();
        active
            .values()
            .min()
            .copied()
            .unwrap_or_else(|| self.current_ts().next())
    }

    /// Forgets deprecated segments and dropped tables below the horizon.
    ///
    /// Only metadata is dropped; the blocks stay in block storage.
    pub fn cleanup(&self) -> CleanupResult {
        let _guard = self.shared.commit_lock.lock();
        let horizon = self.gc_horizon();
        let (segments_reclaimed, tables_reclaimed) = self.shared.catalog.write().reclaim(horizon);
        self.shared
            .stats
            .record_segments_reclaimed(segments_reclaimed as u64);
        if segments_reclaimed > 0 || tables_reclaimed > 0 {
            info!(%horizon, segments_reclaimed, tables_reclaimed, "cleanup reclaimed metadata");
        }
        CleanupResult {
            horizon,
            segments_reclaimed,
            tables_reclaimed,
        }
    }

    /// Stops accepting new transactions. Running ones may still finish.
    pub fn shutdown(&self) {
        if !self.shared.shut_down.swap(true, Ordering::SeqCst) {
            info!(active = self.active_count(), "transaction manager shut down");
        }
    }

    /// Returns whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Returns the statistics counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<DatabaseStats> {
        &self.shared.stats
    }

    /// Returns the block store.
    #[must_use]
    pub fn blocks(&self) -> &BlockStore {
        &self.shared.blocks
    }

    #[cfg(test)]
    pub(crate) fn in_memory(config: Config) -> Self {
        Self::new(config, Box::new(tessera_storage::InMemoryBackend::new()))
            .expect("valid test config")
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("current_ts", &self.current_ts())
            .field("active_count", &self.active_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ConflictPolicy, TableDef, DEFAULT_DATABASE};
    use crate::column::{DataBlock, LogicalType, Value};
    use crate::segment::SegmentStatus;
    use crate::transaction::write_set::{CompactWrite, WriteOp};
    use crate::types::RowId;

    fn tm() -> TransactionManager {
        TransactionManager::in_memory(Config::default())
    }

    fn create_table(tm: &TransactionManager, name: &str) -> Timestamp {
        let mut txn = tm.begin("create", TransactionKind::Normal).unwrap();
        txn.create_table(
            DEFAULT_DATABASE,
            TableDef::new(name, vec![ColumnDef::new("c", LogicalType::TinyInt)]),
            ConflictPolicy::Error,
        )
        .unwrap();
        tm.commit(&mut txn).unwrap()
    }

    #[test]
    fn timestamps_strictly_increase() {
        let tm = tm();
        let mut a = tm.begin("a", TransactionKind::Normal).unwrap();
        let mut b = tm.begin("b", TransactionKind::ReadOnly).unwrap();
        assert!(b.begin_ts() > a.begin_ts());

        let ca = tm.commit(&mut a).unwrap();
        let cb = tm.commit(&mut b).unwrap();
        assert!(ca > b.begin_ts());
        assert!(cb > ca);
        assert_eq!(tm.current_ts(), cb);
        assert_eq!(a.commit_ts(), Some(ca));
    }

    #[test]
    fn commit_twice_is_invalid() {
        let tm = tm();
        let mut txn = tm.begin("t", TransactionKind::Normal).unwrap();
        tm.commit(&mut txn).unwrap();
        let err = tm.commit(&mut txn).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        assert_eq!(txn.state(), TransactionState::Committed);
    }

    #[test]
    fn rollback_is_idempotent_but_not_after_commit() {
        let tm = tm();
        let mut txn = tm.begin("t", TransactionKind::Normal).unwrap();
        tm.rollback(&mut txn).unwrap();
        tm.rollback(&mut txn).unwrap();
        assert_eq!(txn.state(), TransactionState::RolledBack);
        assert!(tm.commit(&mut txn).is_err());

        let mut done = tm.begin("u", TransactionKind::Normal).unwrap();
        tm.commit(&mut done).unwrap();
        assert!(tm.rollback(&mut done).is_err());
    }

    #[test]
    fn rollback_discards_writes() {
        let tm = tm();
        let mut txn = tm.begin("create", TransactionKind::Normal).unwrap();
        txn.create_table(
            DEFAULT_DATABASE,
            TableDef::new("t", vec![ColumnDef::new("c", LogicalType::TinyInt)]),
            ConflictPolicy::Error,
        )
        .unwrap();
        tm.rollback(&mut txn).unwrap();

        let reader = tm.begin("r", TransactionKind::ReadOnly).unwrap();
        assert!(reader
            .get_table_info(DEFAULT_DATABASE, "t")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn foreign_transaction_is_rejected() {
        let a = tm();
        let b = tm();
        let mut txn = a.begin("t", TransactionKind::Normal).unwrap();
        assert!(matches!(
            b.commit(&mut txn),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert!(txn.is_running());
    }

    #[test]
    fn horizon_tracks_oldest_running_transaction() {
        let tm = tm();
        create_table(&tm, "t");
        let idle = tm.gc_horizon();
        assert_eq!(idle, tm.current_ts().next());

        let old = tm.begin("old", TransactionKind::ReadOnly).unwrap();
        let _newer = tm.begin("newer", TransactionKind::ReadOnly).unwrap();
        assert_eq!(tm.gc_horizon(), old.begin_ts());
        assert_eq!(tm.active_count(), 2);

        drop(old);
        assert_eq!(tm.active_count(), 1);
        assert!(tm.gc_horizon() > idle);
    }

    #[test]
    fn shutdown_refuses_new_transactions() {
        let tm = tm();
        let mut running = tm.begin("t", TransactionKind::Normal).unwrap();
        tm.shutdown();
        assert!(tm.is_shut_down());
        assert!(matches!(
            tm.begin("late", TransactionKind::Normal),
            Err(CoreError::ManagerShutDown)
        ));
        tm.commit(&mut running).unwrap();
    }

    fn import_rows(tm: &TransactionManager, table: &str, rows: i8) {
        let mut block = DataBlock::new(&[LogicalType::TinyInt]);
        for v in 0..rows {
            block.append_row(vec![Value::TinyInt(v)]).unwrap();
        }
        let mut txn = tm.begin("import", TransactionKind::Normal).unwrap();
        txn.import(DEFAULT_DATABASE, table, vec![block]).unwrap();
        tm.commit(&mut txn).unwrap();
    }

    fn active_ids(tm: &TransactionManager, table: &str) -> Vec<SegmentId> {
        let txn = tm.begin("list", TransactionKind::ReadOnly).unwrap();
        txn.list_segments(DEFAULT_DATABASE, table)
            .unwrap()
            .into_iter()
            .map(|s| s.segment_id)
            .collect()
    }

    fn compact_write(txn: &mut Transaction) -> &mut CompactWrite {
        match txn.writes.first_mut() {
            Some(WriteOp::Compact(w)) => w,
            other => panic!("expected a buffered compaction, got {other:?}"),
        }
    }

    /// Commits a compaction of every segment of `t` after `tamper` broke
    /// its buffered write, and checks nothing was applied.
    fn assert_compaction_rejected(tamper: impl FnOnce(&mut CompactWrite)) {
        let tm = tm();
        create_table(&tm, "t");
        import_rows(&tm, "t", 3);
        import_rows(&tm, "t", 2);
        let sources = active_ids(&tm, "t");

        let mut txn = tm.begin("compact", TransactionKind::Compact).unwrap();
        txn.compact(DEFAULT_DATABASE, "t", &sources).unwrap();
        tamper(compact_write(&mut txn));
        let before = tm.current_ts();
        let rolled_back = tm.stats().transactions_rolled_back();

        let err = tm.commit(&mut txn).unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation { .. }), "{err:?}");
        assert_eq!(txn.state(), TransactionState::RolledBack);
        assert_eq!(tm.current_ts(), before);
        assert_eq!(tm.active_count(), 0);
        assert_eq!(tm.stats().transactions_rolled_back(), rolled_back + 1);

        assert_eq!(active_ids(&tm, "t"), sources);
        let reader = tm.begin("read", TransactionKind::ReadOnly).unwrap();
        for id in &sources {
            let info = reader.get_segment_info(DEFAULT_DATABASE, "t", *id).unwrap();
            assert_eq!(info.status, SegmentStatus::Active);
            assert_eq!(info.deprecate_ts, None);
        }
    }

    #[test]
    fn source_row_count_mismatch_aborts_commit() {
        assert_compaction_rejected(|w| w.sources[0].row_count += 1);
    }

    #[test]
    fn missing_compaction_output_aborts_commit() {
        assert_compaction_rejected(|w| {
            w.outputs.clear();
        });
    }

    #[test]
    fn broken_copy_map_aborts_commit() {
        assert_compaction_rejected(|w| w.sources[1].output_start += 1);
    }

    #[test]
    fn delete_past_last_row_aborts_commit() {
        let tm = tm();
        create_table(&tm, "t");
        import_rows(&tm, "t", 3);
        let segment = active_ids(&tm, "t")[0];

        let mut txn = tm.begin("delete", TransactionKind::Normal).unwrap();
        txn.delete(DEFAULT_DATABASE, "t", &[RowId::new(segment, 1)])
            .unwrap();
        match txn.writes.first_mut() {
            Some(WriteOp::Delete(w)) => {
                w.rows.entry(segment).or_default().insert(7);
            }
            other => panic!("expected a buffered delete, got {other:?}"),
        }

        let err = tm.commit(&mut txn).unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation { .. }), "{err:?}");
        assert_eq!(txn.state(), TransactionState::RolledBack);

        let reader = tm.begin("read", TransactionKind::ReadOnly).unwrap();
        let info = reader.get_segment_info(DEFAULT_DATABASE, "t", segment).unwrap();
        assert_eq!(info.actual_row_count, 3);
    }

    #[test]
    fn concurrent_begin_commit() {
        use std::thread;

        let tm = tm();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tm = tm.clone();
                thread::spawn(move || {
                    (0..50)
                        .map(|_| {
                            let mut txn = tm.begin(format!("w{i}"), TransactionKind::Normal).unwrap();
                            tm.commit(&mut txn).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<Timestamp> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let n = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), n);
        assert_eq!(tm.active_count(), 0);
        assert_eq!(tm.stats().transactions_committed(), 400);
    }
}
