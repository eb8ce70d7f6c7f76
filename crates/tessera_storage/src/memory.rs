//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory byte store.
///
/// Suitable for tests and ephemeral databases. An optional capacity turns
/// appends past the limit into [`StorageError::CapacityExceeded`], which
/// lets callers exercise storage-full paths deterministically.
///
/// # Example
///
/// ```rust
/// use tessera_storage::{StorageBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
    capacity: Option<u64>,
}

impl InMemoryBackend {
    /// Creates a new empty, unbounded backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that refuses appends beyond `capacity` bytes.
    #[must_use]
    pub fn with_capacity_limit(capacity: u64) -> Self {
        Self {
            data: RwLock::new(Vec::new()),
            capacity: Some(capacity),
        }
    }

    /// Returns a copy of all stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;

        if let Some(capacity) = self.capacity {
            let remaining = capacity.saturating_sub(offset);
            if new_data.len() as u64 > remaining {
                return Err(StorageError::CapacityExceeded {
                    requested: new_data.len(),
                    remaining,
                });
            }
        }

        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn memory_append_returns_correct_offset() {
        let backend = InMemoryBackend::new();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
    }

    #[test]
    fn memory_read_at_returns_correct_data() {
        let backend = InMemoryBackend::new();
        backend.append(b"hello world").unwrap();

        assert_eq!(&backend.read_at(0, 5).unwrap(), b"hello");
        assert_eq!(&backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn memory_read_past_end_fails() {
        let backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn memory_capacity_limit() {
        let backend = InMemoryBackend::with_capacity_limit(8);
        backend.append(b"12345").unwrap();

        let err = backend.append(b"6789").unwrap_err();
        assert!(matches!(
            err,
            StorageError::CapacityExceeded {
                requested: 4,
                remaining: 3
            }
        ));
        // A failed append leaves the store untouched.
        assert_eq!(backend.size().unwrap(), 5);
        backend.append(b"678").unwrap();
        assert_eq!(backend.size().unwrap(), 8);
    }

    #[test]
    fn memory_concurrent_appends_do_not_overlap() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut handles = Vec::new();

        for t in 0..4u8 {
            let b = Arc::clone(&backend);
            handles.push(thread::spawn(move || {
                (0..50)
                    .map(|_| (b.append(&[t; 16]).unwrap(), t))
                    .collect::<Vec<_>>()
            }));
        }

        for h in handles {
            for (offset, t) in h.join().unwrap() {
                assert_eq!(backend.read_at(offset, 16).unwrap(), vec![t; 16]);
            }
        }
        assert_eq!(backend.size().unwrap(), 4 * 50 * 16);
    }
}
