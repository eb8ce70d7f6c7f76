//! Row block encoding.
//!
//! ```text
//! magic "TBLK" | version u8 | columns u16 | rows u32
//! per column: type tag u8 | payload len u32 | payload
//! crc32 u32 over everything before it
//! ```
//!
//! All integers are little-endian.

use crate::column::{ColumnVector, DataBlock, LogicalType};
use crate::error::{CoreError, CoreResult};
use bytes::{Buf, BufMut, BytesMut};

/// Leading bytes of every encoded block.
pub const BLOCK_MAGIC: [u8; 4] = *b"TBLK";

/// Current encoding version.
pub const BLOCK_VERSION: u8 = 1;

const HEADER_SIZE: usize = 4 + 1 + 2 + 4;
const CRC_SIZE: usize = 4;

/// Encodes a block.
///
/// # Errors
///
/// Returns `InvalidArgument` if the block has more columns or rows than the
/// header can describe.
pub fn encode_block(block: &DataBlock) -> CoreResult<Vec<u8>> {
    let columns = u16::try_from(block.column_count())
        .map_err(|_| CoreError::invalid_argument("too many columns for one block"))?;
    let rows = u32::try_from(block.row_count())
        .map_err(|_| CoreError::invalid_argument("too many rows for one block"))?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + CRC_SIZE);
    buf.put_slice(&BLOCK_MAGIC);
    buf.put_u8(BLOCK_VERSION);
    buf.put_u16_le(columns);
    buf.put_u32_le(rows);

    let mut payload = BytesMut::new();
    for column in block.columns() {
        payload.clear();
        column.encode_values(&mut payload);
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_argument("column payload exceeds 4 GiB"))?;
        buf.put_u8(column.logical_type().tag());
        buf.put_u32_le(len);
        buf.put_slice(&payload);
    }

    let crc = crc32fast::hash(&buf);
    buf.put_u32_le(crc);
    Ok(buf.to_vec())
}

/// Decodes and verifies a block produced by [`encode_block`].
///
/// The returned block is finalized.
///
/// # Errors
///
/// Returns `BlockCorruption` on a checksum mismatch, an unknown magic,
/// version or type tag, or any truncated section.
pub fn decode_block(data: &[u8]) -> CoreResult<DataBlock> {
    if data.len() < HEADER_SIZE + CRC_SIZE {
        return Err(CoreError::block_corruption(format!(
            "block of {} bytes is shorter than its header",
            data.len()
        )));
    }

    let (body, mut crc_bytes) = data.split_at(data.len() - CRC_SIZE);
    let expected = crc_bytes.get_u32_le();
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(CoreError::block_corruption(format!(
            "checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
        )));
    }

    let mut buf = body;
    if buf[..4] != BLOCK_MAGIC {
        return Err(CoreError::block_corruption("bad block magic"));
    }
    buf.advance(4);
    let version = buf.get_u8();
    if version != BLOCK_VERSION {
        return Err(CoreError::block_corruption(format!(
            "unsupported block version {version}"
        )));
    }
    let column_count = buf.get_u16_le() as usize;
    let rows = buf.get_u32_le() as usize;

    let mut columns = Vec::with_capacity(column_count);
    for idx in 0..column_count {
        if buf.remaining() < 5 {
            return Err(CoreError::block_corruption(format!(
                "column {idx} header truncated"
            )));
        }
        let tag = buf.get_u8();
        let ty = LogicalType::from_tag(tag).ok_or_else(|| {
            CoreError::block_corruption(format!("column {idx} has unknown type tag {tag}"))
        })?;
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return Err(CoreError::block_corruption(format!(
                "column {idx} payload truncated"
            )));
        }
        let mut payload = &buf[..len];
        let column = ColumnVector::decode_values(ty, rows, &mut payload)?;
        if payload.has_remaining() {
            return Err(CoreError::block_corruption(format!(
                "column {idx} has {} trailing bytes",
                payload.remaining()
            )));
        }
        buf.advance(len);
        columns.push(column);
    }

    if buf.has_remaining() {
        return Err(CoreError::block_corruption("trailing bytes after last column"));
    }

    let mut block = DataBlock::from_columns(columns)
        .map_err(|e| CoreError::block_corruption(e.to_string()))?;
    block.finalize();
    Ok(block)
}
