//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A single append-only data file.
///
/// - `flush()` calls `File::flush()`
/// - `sync()` calls `File::sync_all()`
///
/// Reads and appends share one file handle behind a mutex; the cached size
/// is updated only after a successful write, so a failed append never
/// publishes a torn offset.
///
/// # Example
///
/// ```no_run
/// use tessera_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("blocks.dat")).unwrap();
/// let offset = backend.append(b"block bytes").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens or creates the data file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileState { file, size }),
        })
    }

    /// Opens or creates the data file, creating parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.inner.lock();
        let size = state.size;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        state.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        state.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        let mut state = self.inner.lock();
        let offset = state.size;
        if data.is_empty() {
            return Ok(offset);
        }

        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        state.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&self) -> StorageResult<()> {
        self.inner.lock().file.flush()?;
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.dat");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("blocks.dat")).unwrap();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(&backend.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(&backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("blocks.dat")).unwrap();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(3, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn file_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.dat");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent block").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 16);
        assert_eq!(&backend.read_at(0, 16).unwrap(), b"persistent block");
        // Appends after reopen land at the end, not at offset zero.
        assert_eq!(backend.append(b"!").unwrap(), 16);
    }

    #[test]
    fn file_empty_append_and_read() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("blocks.dat")).unwrap();
        backend.append(b"x").unwrap();

        assert_eq!(backend.append(b"").unwrap(), 1);
        assert!(backend.read_at(1, 0).unwrap().is_empty());
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db").join("data").join("blocks.dat");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        backend.flush().unwrap();
        assert!(path.exists());
    }
}
