//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read bytes that were never appended.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// The backend has a size limit and the append would exceed it.
    #[error("storage capacity exceeded: {requested} bytes requested, {remaining} remaining")]
    CapacityExceeded {
        /// Bytes the append needed.
        requested: usize,
        /// Bytes still available.
        remaining: u64,
    },
}
