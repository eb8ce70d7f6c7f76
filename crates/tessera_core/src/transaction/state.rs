//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::transaction::manager::ManagerShared;
use crate::transaction::write_set::WriteOp;
use crate::types::{TransactionId, Timestamp};
use std::fmt;
use std::sync::Arc;

/// What a transaction is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionKind {
    /// Reads and any writes except compaction alongside other writes.
    #[default]
    Normal,
    /// Reads only. Still pins its snapshot until it ends.
    ReadOnly,
    /// A compaction and nothing else.
    Compact,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::ReadOnly => f.write_str("read-only"),
            Self::Compact => f.write_str("compact"),
        }
    }
}

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is running and can perform operations.
    Running,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteKind {
    Import,
    Delete,
    Ddl,
    Compact,
}

/// A running or finished transaction.
///
/// Reads see the table version state as of [`begin_ts`](Self::begin_ts).
/// Writes are buffered and only become visible when the transaction manager
/// commits them. Dropping a running transaction rolls it back.
pub struct Transaction {
    id: TransactionId,
    name: String,
    kind: TransactionKind,
    begin_ts: Timestamp,
    commit_ts: Option<Timestamp>,
    state: TransactionState,
    pub(crate) writes: Vec<WriteOp>,
    /// Set when an operation hit a conflict; commit will fail with it.
    pub(crate) doomed: Option<String>,
    pub(crate) shared: Arc<ManagerShared>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        name: String,
        kind: TransactionKind,
        begin_ts: Timestamp,
        shared: Arc<ManagerShared>,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            begin_ts,
            commit_ts: None,
            state: TransactionState::Running,
            writes: Vec::new(),
            doomed: None,
            shared,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the name given at begin.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the transaction kind.
    #[must_use]
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Returns the snapshot timestamp.
    #[must_use]
    pub fn begin_ts(&self) -> Timestamp {
        self.begin_ts
    }

    /// Returns the commit timestamp once committed.
    #[must_use]
    pub fn commit_ts(&self) -> Option<Timestamp> {
        self.commit_ts
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == TransactionState::Running
    }

    /// Returns whether an earlier operation hit a conflict.
    #[must_use]
    pub fn is_doomed(&self) -> bool {
        self.doomed.is_some()
    }

    /// Returns the number of buffered writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub(crate) fn mark_committed(&mut self, ts: Timestamp) {
        self.state = TransactionState::Committed;
        self.commit_ts = Some(ts);
    }

    pub(crate) fn mark_rolled_back(&mut self) {
        self.writes.clear();
        self.state = TransactionState::RolledBack;
    }

    pub(crate) fn ensure_running(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Running => Ok(()),
            TransactionState::Committed => Err(CoreError::invalid_operation(format!(
                "transaction {} already committed",
                self.id
            ))),
            TransactionState::RolledBack => Err(CoreError::invalid_operation(format!(
                "transaction {} already rolled back",
                self.id
            ))),
        }
    }

    /// Checks that a write of `what` may be buffered.
    ///
    /// A compaction must be the only write of its transaction, and a
    /// compact-kind transaction does nothing but compact.
    pub(crate) fn ensure_writable(&self, what: WriteKind) -> CoreResult<()> {
        self.ensure_running()?;
        if let Some(reason) = &self.doomed {
            return Err(CoreError::conflict(self.id, reason.clone()));
        }
        match (self.kind, what) {
            (TransactionKind::ReadOnly, _) => {
                return Err(CoreError::invalid_operation(format!(
                    "transaction {} is read-only",
                    self.id
                )))
            }
            (TransactionKind::Compact, w) if w != WriteKind::Compact => {
                return Err(CoreError::invalid_operation(format!(
                    "compact transaction {} cannot buffer other writes",
                    self.id
                )))
            }
            _ => {}
        }
        let has_compact = self
            .writes
            .iter()
            .any(|w| matches!(w, WriteOp::Compact(_)));
        if has_compact || (what == WriteKind::Compact && !self.writes.is_empty()) {
            return Err(CoreError::invalid_operation(format!(
                "transaction {}: a compaction must be the only write",
                self.id
            )));
        }
        Ok(())
    }

    /// Records a conflict so that commit fails with it, and returns it.
    pub(crate) fn doom(&mut self, err: CoreError) -> CoreError {
        if let CoreError::TransactionConflict { reason, .. } = &err {
            self.doomed.get_or_insert_with(|| reason.clone());
        }
        err
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_running() {
            self.shared.unregister(self.id);
            self.shared.stats.record_transaction_rollback();
            tracing::debug!(txn = %self.id, name = %self.name, "transaction dropped while running");
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("begin_ts", &self.begin_ts)
            .field("commit_ts", &self.commit_ts)
            .field("state", &self.state)
            .field("writes", &self.writes.len())
            .finish_non_exhaustive()
    }
}
