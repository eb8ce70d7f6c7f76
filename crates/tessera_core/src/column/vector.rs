//! Typed column vector.

use crate::column::value::{LogicalType, Value};
use crate::error::{CoreError, CoreResult};
use bytes::{Buf, BufMut, BytesMut};

#[derive(Debug, Clone, PartialEq)]
enum ColumnData {
    Boolean(Vec<bool>),
    TinyInt(Vec<i8>),
    SmallInt(Vec<i16>),
    Integer(Vec<i32>),
    BigInt(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Varchar(Vec<String>),
}

/// Runs `$body` with `$v` bound to the inner `Vec` of whatever variant `$data` is.
macro_rules! with_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ColumnData::Boolean($v) => $body,
            ColumnData::TinyInt($v) => $body,
            ColumnData::SmallInt($v) => $body,
            ColumnData::Integer($v) => $body,
            ColumnData::BigInt($v) => $body,
            ColumnData::Float($v) => $body,
            ColumnData::Double($v) => $body,
            ColumnData::Varchar($v) => $body,
        }
    };
}

/// Runs `$body` when `$dst` and `$src` hold the same variant, `$mismatch` otherwise.
macro_rules! zip_data {
    ($dst:expr, $src:expr, $a:ident, $b:ident => $body:expr, $mismatch:expr) => {
        match ($dst, $src) {
            (ColumnData::Boolean($a), ColumnData::Boolean($b)) => $body,
            (ColumnData::TinyInt($a), ColumnData::TinyInt($b)) => $body,
            (ColumnData::SmallInt($a), ColumnData::SmallInt($b)) => $body,
            (ColumnData::Integer($a), ColumnData::Integer($b)) => $body,
            (ColumnData::BigInt($a), ColumnData::BigInt($b)) => $body,
            (ColumnData::Float($a), ColumnData::Float($b)) => $body,
            (ColumnData::Double($a), ColumnData::Double($b)) => $body,
            (ColumnData::Varchar($a), ColumnData::Varchar($b)) => $body,
            _ => $mismatch,
        }
    };
}

/// A column of values sharing one [`LogicalType`].
///
/// Values are appended until [`finalize`](Self::finalize) is called; after
/// that the column is read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnVector {
    logical_type: LogicalType,
    data: ColumnData,
    finalized: bool,
}

impl ColumnVector {
    /// Creates an empty column of the given type.
    #[must_use]
    pub fn new(logical_type: LogicalType) -> Self {
        Self::with_capacity(logical_type, 0)
    }

    /// Creates an empty column with room for `capacity` values.
    #[must_use]
    pub fn with_capacity(logical_type: LogicalType, capacity: usize) -> Self {
        let data = match logical_type {
            LogicalType::Boolean => ColumnData::Boolean(Vec::with_capacity(capacity)),
            LogicalType::TinyInt => ColumnData::TinyInt(Vec::with_capacity(capacity)),
            LogicalType::SmallInt => ColumnData::SmallInt(Vec::with_capacity(capacity)),
            LogicalType::Integer => ColumnData::Integer(Vec::with_capacity(capacity)),
            LogicalType::BigInt => ColumnData::BigInt(Vec::with_capacity(capacity)),
            LogicalType::Float => ColumnData::Float(Vec::with_capacity(capacity)),
            LogicalType::Double => ColumnData::Double(Vec::with_capacity(capacity)),
            LogicalType::Varchar => ColumnData::Varchar(Vec::with_capacity(capacity)),
        };
        Self {
            logical_type,
            data,
            finalized: false,
        }
    }

    /// Returns the column's logical type.
    #[must_use]
    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        with_data!(&self.data, v => v.len())
    }

    /// Returns whether the column holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the column has been finalized.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Seals the column against further appends.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Appends one value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the value's type differs from the
    /// column's, and `InvalidOperation` if the column is finalized.
    pub fn append_value(&mut self, value: Value) -> CoreResult<()> {
        self.ensure_open()?;
        match (&mut self.data, value) {
            (ColumnData::Boolean(v), Value::Boolean(x)) => v.push(x),
            (ColumnData::TinyInt(v), Value::TinyInt(x)) => v.push(x),
            (ColumnData::SmallInt(v), Value::SmallInt(x)) => v.push(x),
            (ColumnData::Integer(v), Value::Integer(x)) => v.push(x),
            (ColumnData::BigInt(v), Value::BigInt(x)) => v.push(x),
            (ColumnData::Float(v), Value::Float(x)) => v.push(x),
            (ColumnData::Double(v), Value::Double(x)) => v.push(x),
            (ColumnData::Varchar(v), Value::Varchar(x)) => v.push(x),
            (_, other) => {
                return Err(CoreError::invalid_argument(format!(
                    "cannot append {} value to {} column",
                    other.logical_type(),
                    self.logical_type
                )))
            }
        }
        Ok(())
    }

    /// Appends `len` values of `src` starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on a type mismatch or an out-of-range
    /// slice, and `InvalidOperation` if this column is finalized.
    pub fn extend_from(&mut self, src: &ColumnVector, start: usize, len: usize) -> CoreResult<()> {
        self.ensure_open()?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= src.len())
            .ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "slice {start}+{len} out of range for column of {} values",
                    src.len()
                ))
            })?;
        let dst_type = self.logical_type;
        zip_data!(
            &mut self.data,
            &src.data,
            a,
            b => {
                a.extend_from_slice(&b[start..end]);
                Ok(())
            },
            Err(CoreError::invalid_argument(format!(
                "cannot copy {} values into {} column",
                src.logical_type, dst_type
            )))
        )
    }

    /// Returns the value at `index`.
    #[must_use]
    pub fn value_at(&self, index: usize) -> Option<Value> {
        match &self.data {
            ColumnData::Boolean(v) => v.get(index).copied().map(Value::Boolean),
            ColumnData::TinyInt(v) => v.get(index).copied().map(Value::TinyInt),
            ColumnData::SmallInt(v) => v.get(index).copied().map(Value::SmallInt),
            ColumnData::Integer(v) => v.get(index).copied().map(Value::Integer),
            ColumnData::BigInt(v) => v.get(index).copied().map(Value::BigInt),
            ColumnData::Float(v) => v.get(index).copied().map(Value::Float),
            ColumnData::Double(v) => v.get(index).copied().map(Value::Double),
            ColumnData::Varchar(v) => v.get(index).cloned().map(Value::Varchar),
        }
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.finalized {
            return Err(CoreError::invalid_operation("column is finalized"));
        }
        Ok(())
    }

    /// Writes the column's values (no header) in little-endian order.
    pub(crate) fn encode_values(&self, buf: &mut BytesMut) {
        match &self.data {
            ColumnData::Boolean(v) => v.iter().for_each(|&x| buf.put_u8(u8::from(x))),
            ColumnData::TinyInt(v) => v.iter().for_each(|&x| buf.put_i8(x)),
            ColumnData::SmallInt(v) => v.iter().for_each(|&x| buf.put_i16_le(x)),
            ColumnData::Integer(v) => v.iter().for_each(|&x| buf.put_i32_le(x)),
            ColumnData::BigInt(v) => v.iter().for_each(|&x| buf.put_i64_le(x)),
            ColumnData::Float(v) => v.iter().for_each(|&x| buf.put_f32_le(x)),
            ColumnData::Double(v) => v.iter().for_each(|&x| buf.put_f64_le(x)),
            ColumnData::Varchar(v) => {
                for s in v {
                    buf.put_u32_le(s.len() as u32);
                    buf.put_slice(s.as_bytes());
                }
            }
        }
    }

    /// Reads `rows` values of `logical_type` written by [`encode_values`](Self::encode_values).
    ///
    /// The returned column is finalized.
    pub(crate) fn decode_values(
        logical_type: LogicalType,
        rows: usize,
        buf: &mut &[u8],
    ) -> CoreResult<Self> {
        if let Some(width) = logical_type.fixed_width() {
            let needed = width.checked_mul(rows).unwrap_or(usize::MAX);
            if buf.remaining() < needed {
                return Err(CoreError::block_corruption(format!(
                    "{logical_type} column needs {needed} bytes, {} left",
                    buf.remaining()
                )));
            }
        }

        let mut column = Self::with_capacity(logical_type, rows);
        match &mut column.data {
            ColumnData::Boolean(v) => v.extend((0..rows).map(|_| buf.get_u8() != 0)),
            ColumnData::TinyInt(v) => v.extend((0..rows).map(|_| buf.get_i8())),
            ColumnData::SmallInt(v) => v.extend((0..rows).map(|_| buf.get_i16_le())),
            ColumnData::Integer(v) => v.extend((0..rows).map(|_| buf.get_i32_le())),
            ColumnData::BigInt(v) => v.extend((0..rows).map(|_| buf.get_i64_le())),
            ColumnData::Float(v) => v.extend((0..rows).map(|_| buf.get_f32_le())),
            ColumnData::Double(v) => v.extend((0..rows).map(|_| buf.get_f64_le())),
            ColumnData::Varchar(v) => {
                for _ in 0..rows {
                    if buf.remaining() < 4 {
                        return Err(CoreError::block_corruption("truncated varchar length"));
                    }
                    let len = buf.get_u32_le() as usize;
                    if buf.remaining() < len {
                        return Err(CoreError::block_corruption("truncated varchar payload"));
                    }
                    let s = std::str::from_utf8(&buf[..len])
                        .map_err(|e| CoreError::block_corruption(format!("varchar: {e}")))?
                        .to_owned();
                    buf.advance(len);
                    v.push(s);
                }
            }
        }
        column.finalized = true;
        Ok(column)
    }
}
