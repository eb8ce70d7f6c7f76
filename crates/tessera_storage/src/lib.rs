//! # Tessera Storage
//!
//! Byte-store backends underneath Tessera's block storage.
//!
//! Backends are **opaque append-only byte stores**. They know nothing about
//! row blocks, segments or columns: the core crate encodes sealed row blocks
//! and hands the bytes to a backend, keeping only the returned offset.
//!
//! ## Design Principles
//!
//! - Appends never move existing bytes, so a returned offset stays valid
//! - All operations take `&self`; readers and appenders run concurrently
//! - Must be `Send + Sync` so scans can run on any thread
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral databases
//! - [`FileBackend`] - For a single append-only data file
//!
//! ## Example
//!
//! ```rust
//! use tessera_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! let offset = backend.append(b"row block").unwrap();
//! let data = backend.read_at(offset, 9).unwrap();
//! assert_eq!(&data, b"row block");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
