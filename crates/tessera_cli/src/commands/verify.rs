//! Verify command implementation.

use serde::Serialize;
use std::path::Path;
use tessera_core::block::{decode_block, BLOCK_MAGIC};
use tessera_core::BLOCK_FILE_NAME;
use tessera_storage::{FileBackend, StorageBackend};

const HEADER_SIZE: u64 = 4 + 1 + 2 + 4;
const COLUMN_HEADER_SIZE: u64 = 1 + 4;
const CRC_SIZE: u64 = 4;

/// Verification result.
#[derive(Debug, Default, Serialize)]
pub struct VerifyResult {
    /// Size of the block file in bytes.
    pub file_size: u64,
    /// Number of blocks checked.
    pub blocks_checked: usize,
    /// Number of valid blocks.
    pub valid_blocks: usize,
    /// Number of corrupt blocks.
    pub corrupt_blocks: usize,
    /// Rows in the valid blocks.
    pub rows: u64,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Whether no problem was found.
    pub fn is_ok(&self) -> bool {
        self.corrupt_blocks == 0 && self.errors.is_empty()
    }
}

/// Runs the verify command over the block file in `path`.
pub fn run(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let block_path = path.join(BLOCK_FILE_NAME);
    if !block_path.exists() {
        return Err(format!("No block file found at {:?}", block_path).into());
    }
    let backend = FileBackend::open(&block_path)?;
    verify_blocks(&backend)
}

/// Walks `backend` block by block, decoding and checksumming each one.
pub fn verify_blocks(
    backend: &dyn StorageBackend,
) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let size = backend.size()?;
    let mut result = VerifyResult {
        file_size: size,
        ..VerifyResult::default()
    };
    let mut offset = 0u64;

    while offset < size {
        result.blocks_checked += 1;
        let len = match encoded_len(backend, offset, size) {
            Ok(len) => len,
            Err(message) => {
                result.errors.push(format!("Block at offset {}: {}", offset, message));
                result.corrupt_blocks += 1;
                break;
            }
        };

        let data = backend.read_at(offset, len as usize)?;
        match decode_block(&data) {
            Ok(block) => {
                result.valid_blocks += 1;
                result.rows += block.row_count() as u64;
            }
            Err(e) => {
                result.errors.push(format!("Block at offset {}: {}", offset, e));
                result.corrupt_blocks += 1;
            }
        }

        offset += len;
    }

    Ok(result)
}

/// Length of the encoded block starting at `offset`, read from its headers.
fn encoded_len(backend: &dyn StorageBackend, offset: u64, size: u64) -> Result<u64, String> {
    let read = |at: u64, len: u64| -> Result<Vec<u8>, String> {
        if at + len > size {
            return Err(format!(
                "truncated: needs {} bytes at {}, file has {}",
                len, at, size
            ));
        }
        backend.read_at(at, len as usize).map_err(|e| e.to_string())
    };

    let header = read(offset, HEADER_SIZE)?;
    if header[..4] != BLOCK_MAGIC {
        return Err(format!("invalid magic {:?}", &header[..4]));
    }
    let columns = u16::from_le_bytes([header[5], header[6]]);

    let mut len = HEADER_SIZE;
    for _ in 0..columns {
        let column = read(offset + len, COLUMN_HEADER_SIZE)?;
        let payload = u32::from_le_bytes([column[1], column[2], column[3], column[4]]);
        len += COLUMN_HEADER_SIZE + u64::from(payload);
    }
    len += CRC_SIZE;
    if offset + len > size {
        return Err(format!(
            "truncated: needs {} bytes, only {} available",
            len,
            size - offset
        ));
    }
    Ok(len)
}

/// Prints a result for humans.
pub fn print_text(path: &Path, result: &VerifyResult) {
    println!("Verifying blocks at {:?}", path.join(BLOCK_FILE_NAME));
    println!(
        "  {} bytes, blocks checked: {}, valid: {}, corrupt: {}, rows: {}",
        result.file_size,
        result.blocks_checked,
        result.valid_blocks,
        result.corrupt_blocks,
        result.rows
    );
    for error in &result.errors {
        println!("    ERROR: {}", error);
    }
    println!();
    if result.is_ok() {
        println!("✓ Block verification passed");
    } else {
        println!("✗ Block verification failed");
    }
}
