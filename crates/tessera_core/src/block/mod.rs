//! Block storage.
//!
//! Row blocks are encoded with a small self-describing layout and appended to
//! a [`StorageBackend`](tessera_storage::StorageBackend). The returned
//! [`BlockHandle`] is all a segment needs to read the block back.

mod codec;
mod store;

pub use codec::{decode_block, encode_block, BLOCK_MAGIC, BLOCK_VERSION};
pub use store::{BlockHandle, BlockStore};
