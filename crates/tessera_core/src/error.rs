//! Error types for Tessera core.

use crate::types::{SegmentId, TransactionId};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`].
///
/// Callers branch on the kind rather than on individual variants, e.g. a
/// retry loop retries [`ErrorKind::Conflict`] and gives up on everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A database, table or segment does not exist at the queried snapshot.
    NotFound,
    /// The transaction lost a write-write race and was rolled back.
    Conflict,
    /// The caller passed something malformed.
    InvalidArgument,
    /// An internal invariant does not hold.
    Internal,
    /// The block storage backend failed.
    Storage,
    /// The transaction manager no longer accepts transactions.
    Shutdown,
}

/// Errors that can occur in Tessera core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tessera_storage::StorageError),

    /// Database does not exist.
    #[error("database not found: {name}")]
    DatabaseNotFound {
        /// Name of the database.
        name: String,
    },

    /// Table does not exist at the transaction's snapshot.
    #[error("table not found: {database}.{table}")]
    TableNotFound {
        /// Database searched.
        database: String,
        /// Table name searched.
        table: String,
    },

    /// Segment does not exist, or is not visible, at the transaction's snapshot.
    #[error("segment {segment_id} not found in table {table}")]
    SegmentNotFound {
        /// Table searched.
        table: String,
        /// The segment that was not found.
        segment_id: SegmentId,
    },

    /// Table already exists and the conflict policy is `Error`.
    #[error("table already exists: {database}.{table}")]
    TableExists {
        /// Database name.
        database: String,
        /// Table name.
        table: String,
    },

    /// Write-write conflict; the transaction has been rolled back.
    #[error("transaction {txn_id} conflict: {reason}")]
    TransactionConflict {
        /// The transaction that lost.
        txn_id: TransactionId,
        /// What it collided with.
        reason: String,
    },

    /// Malformed input.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// An encoded row block failed validation on read.
    #[error("block corruption: {message}")]
    BlockCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Internal invariant violation detected before any state was changed.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the broken invariant.
        message: String,
    },

    /// The transaction manager has been shut down.
    #[error("transaction manager is shut down")]
    ManagerShutDown,
}

impl CoreError {
    /// Creates a table-not-found error.
    pub fn table_not_found(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self::TableNotFound {
            database: database.into(),
            table: table.into(),
        }
    }

    /// Creates a segment-not-found error.
    pub fn segment_not_found(table: impl Into<String>, segment_id: SegmentId) -> Self {
        Self::SegmentNotFound {
            table: table.into(),
            segment_id,
        }
    }

    /// Creates a transaction conflict error.
    pub fn conflict(txn_id: TransactionId, reason: impl Into<String>) -> Self {
        Self::TransactionConflict {
            txn_id,
            reason: reason.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a block corruption error.
    pub fn block_corruption(message: impl Into<String>) -> Self {
        Self::BlockCorruption {
            message: message.into(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Returns the coarse classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DatabaseNotFound { .. }
            | Self::TableNotFound { .. }
            | Self::SegmentNotFound { .. } => ErrorKind::NotFound,
            Self::TransactionConflict { .. } => ErrorKind::Conflict,
            Self::TableExists { .. } | Self::InvalidArgument { .. } | Self::InvalidOperation { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::BlockCorruption { .. } | Self::InvariantViolation { .. } => ErrorKind::Internal,
            Self::Storage(_) => ErrorKind::Storage,
            Self::ManagerShutDown => ErrorKind::Shutdown,
        }
    }

    /// Returns whether this error is a transaction conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Returns whether this error is a not-found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
