//! Block storage over a byte-store backend.

use crate::block::codec::{decode_block, encode_block};
use crate::column::DataBlock;
use crate::error::{CoreError, CoreResult};
use crate::stats::DatabaseStats;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_storage::StorageBackend;

/// Location of one encoded block inside the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHandle {
    /// Byte offset of the encoded block.
    pub offset: u64,
    /// Encoded length in bytes.
    pub len: u32,
    /// Rows in the block.
    pub row_count: u32,
}

/// Writes and reads encoded row blocks.
///
/// Blocks are append-only; a handle stays valid for the lifetime of the
/// backend. Nothing here knows about segments or visibility.
pub struct BlockStore {
    backend: Box<dyn StorageBackend>,
    stats: Arc<DatabaseStats>,
}

impl BlockStore {
    /// Creates a block store over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>, stats: Arc<DatabaseStats>) -> Self {
        Self { backend, stats }
    }

    /// Encodes and appends a block.
    pub fn write_block(&self, block: &DataBlock) -> CoreResult<BlockHandle> {
        let encoded = encode_block(block)?;
        let len = u32::try_from(encoded.len())
            .map_err(|_| CoreError::invalid_argument("encoded block exceeds 4 GiB"))?;
        let row_count = u32::try_from(block.row_count())
            .map_err(|_| CoreError::invalid_argument("too many rows for one block"))?;
        let offset = self.backend.append(&encoded)?;
        self.stats.record_block_write(u64::from(len));
        Ok(BlockHandle {
            offset,
            len,
            row_count,
        })
    }

    /// Reads and verifies the block at `handle`.
    pub fn read_block(&self, handle: &BlockHandle) -> CoreResult<DataBlock> {
        let data = self.backend.read_at(handle.offset, handle.len as usize)?;
        let block = decode_block(&data)?;
        if block.row_count() != handle.row_count as usize {
            return Err(CoreError::block_corruption(format!(
                "block at offset {} has {} rows, handle says {}",
                handle.offset,
                block.row_count(),
                handle.row_count
            )));
        }
        self.stats.record_block_read(u64::from(handle.len));
        Ok(block)
    }

    /// Flushes buffered writes to the backend.
    pub fn flush(&self) -> CoreResult<()> {
        Ok(self.backend.flush()?)
    }

    /// Flushes and syncs the backend to durable storage.
    pub fn sync(&self) -> CoreResult<()> {
        Ok(self.backend.sync()?)
    }

    /// Returns the number of bytes held by the backend.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Returns the backend's name.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}
