//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store that holds encoded row blocks.
///
/// # Invariants
///
/// - `append` returns the offset where the bytes start
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - bytes are never rewritten once appended
/// - `flush`/`sync` make every previous append durable
///
/// # Implementors
///
/// - [`super::InMemoryBackend`]
/// - [`super::FileBackend`]
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// if the range is not fully written, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is full or an I/O error occurs.
    fn append(&self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered appends to the operating system.
    fn flush(&self) -> StorageResult<()>;

    /// Makes all appended data and metadata durable.
    fn sync(&self) -> StorageResult<()>;

    /// Returns the number of bytes appended so far.
    fn size(&self) -> StorageResult<u64>;

    /// Short backend name used in log fields.
    fn name(&self) -> &'static str;
}
