//! Row blocks.

use crate::column::value::{LogicalType, Value};
use crate::column::vector::ColumnVector;
use crate::error::{CoreError, CoreResult};

/// A horizontal slice of a table: one [`ColumnVector`] per column, all of the
/// same length.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    columns: Vec<ColumnVector>,
    row_count: usize,
    finalized: bool,
}

impl DataBlock {
    /// Creates an empty block with one column per type.
    #[must_use]
    pub fn new(types: &[LogicalType]) -> Self {
        Self::with_capacity(types, 0)
    }

    /// Creates an empty block with room for `rows` rows per column.
    #[must_use]
    pub fn with_capacity(types: &[LogicalType], rows: usize) -> Self {
        Self {
            columns: types
                .iter()
                .map(|&ty| ColumnVector::with_capacity(ty, rows))
                .collect(),
            row_count: 0,
            finalized: false,
        }
    }

    /// Builds a block from already populated columns.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if there are no columns or their lengths differ.
    pub fn from_columns(columns: Vec<ColumnVector>) -> CoreResult<Self> {
        let Some(first) = columns.first() else {
            return Err(CoreError::invalid_argument("a block needs at least one column"));
        };
        let row_count = first.len();
        if let Some((idx, col)) = columns
            .iter()
            .enumerate()
            .find(|(_, col)| col.len() != row_count)
        {
            return Err(CoreError::invalid_argument(format!(
                "column {idx} has {} rows, expected {row_count}",
                col.len()
            )));
        }
        let finalized = columns.iter().all(ColumnVector::is_finalized);
        Ok(Self {
            columns,
            row_count,
            finalized,
        })
    }

    /// Returns the logical types of the columns, in order.
    #[must_use]
    pub fn types(&self) -> Vec<LogicalType> {
        self.columns.iter().map(ColumnVector::logical_type).collect()
    }

    /// Returns the column at `index`.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&ColumnVector> {
        self.columns.get(index)
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Returns whether the block holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Returns whether the block has been finalized.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Seals the block and all of its columns.
    pub fn finalize(&mut self) {
        self.columns.iter_mut().for_each(ColumnVector::finalize);
        self.finalized = true;
    }

    /// Appends one row.
    ///
    /// The row is validated in full before any column is touched, so a failed
    /// append leaves the block unchanged.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on an arity or type mismatch and
    /// `InvalidOperation` if the block is finalized.
    pub fn append_row(&mut self, row: Vec<Value>) -> CoreResult<()> {
        self.ensure_open()?;
        if row.len() != self.columns.len() {
            return Err(CoreError::invalid_argument(format!(
                "row has {} values, block has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (idx, (col, value)) in self.columns.iter().zip(&row).enumerate() {
            if col.logical_type() != value.logical_type() {
                return Err(CoreError::invalid_argument(format!(
                    "column {idx}: expected {}, got {}",
                    col.logical_type(),
                    value.logical_type()
                )));
            }
        }
        for (col, value) in self.columns.iter_mut().zip(row) {
            col.append_value(value)?;
        }
        self.row_count += 1;
        Ok(())
    }

    /// Appends rows `start..start + len` of `src`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the schemas differ or the range is out of
    /// bounds, and `InvalidOperation` if this block is finalized.
    pub fn extend_from(&mut self, src: &DataBlock, start: usize, len: usize) -> CoreResult<()> {
        self.ensure_open()?;
        if src.types() != self.types() {
            return Err(CoreError::invalid_argument("block schemas differ"));
        }
        if start.checked_add(len).map_or(true, |end| end > src.row_count) {
            return Err(CoreError::invalid_argument(format!(
                "rows {start}+{len} out of range for block of {} rows",
                src.row_count
            )));
        }
        for (dst, col) in self.columns.iter_mut().zip(&src.columns) {
            dst.extend_from(col, start, len)?;
        }
        self.row_count += len;
        Ok(())
    }

    /// Returns a copy of rows `start..start + len` as a new, open block.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the range is out of bounds.
    pub fn slice(&self, start: usize, len: usize) -> CoreResult<DataBlock> {
        let mut out = DataBlock::with_capacity(&self.types(), len);
        out.extend_from(self, start, len)?;
        Ok(out)
    }

    /// Returns the values of row `index`.
    #[must_use]
    pub fn row(&self, index: usize) -> Option<Vec<Value>> {
        if index >= self.row_count {
            return None;
        }
        self.columns.iter().map(|col| col.value_at(index)).collect()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.finalized {
            return Err(CoreError::invalid_operation("block is finalized"));
        }
        Ok(())
    }

    pub(crate) fn columns(&self) -> &[ColumnVector] {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_block(values: &[i8]) -> DataBlock {
        let mut block = DataBlock::new(&[LogicalType::TinyInt]);
        for &v in values {
            block.append_row(vec![Value::TinyInt(v)]).unwrap();
        }
        block
    }

    #[test]
    fn append_rows_and_read_back() {
        let mut block = DataBlock::new(&[LogicalType::Integer, LogicalType::Varchar]);
        block
            .append_row(vec![Value::Integer(1), Value::Varchar("one".into())])
            .unwrap();
        block
            .append_row(vec![Value::Integer(2), Value::Varchar("two".into())])
            .unwrap();

        assert_eq!(block.row_count(), 2);
        assert_eq!(block.column_count(), 2);
        assert_eq!(
            block.row(1),
            Some(vec![Value::Integer(2), Value::Varchar("two".into())])
        );
        assert_eq!(block.row(2), None);
    }

    #[test]
    fn bad_row_leaves_block_unchanged() {
        let mut block = DataBlock::new(&[LogicalType::Integer, LogicalType::Boolean]);
        let err = block
            .append_row(vec![Value::Integer(1), Value::Integer(2)])
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
        assert!(block.append_row(vec![Value::Integer(1)]).is_err());

        assert_eq!(block.row_count(), 0);
        assert!(block.column(0).unwrap().is_empty());
    }

    #[test]
    fn from_columns_checks_lengths() {
        let mut a = ColumnVector::new(LogicalType::TinyInt);
        a.append_value(Value::TinyInt(1)).unwrap();
        let b = ColumnVector::new(LogicalType::TinyInt);

        assert!(DataBlock::from_columns(vec![a.clone(), b]).is_err());
        assert!(DataBlock::from_columns(Vec::new()).is_err());

        let block = DataBlock::from_columns(vec![a]).unwrap();
        assert_eq!(block.row_count(), 1);
    }

    #[test]
    fn slice_and_extend() {
        let src = tiny_block(&[1, 2, 3, 4, 5]);
        let part = src.slice(1, 3).unwrap();
        assert_eq!(part.row_count(), 3);
        assert_eq!(part.row(0), Some(vec![Value::TinyInt(2)]));

        let mut dst = tiny_block(&[9]);
        dst.extend_from(&part, 2, 1).unwrap();
        assert_eq!(dst.row(1), Some(vec![Value::TinyInt(4)]));

        assert!(src.slice(4, 2).is_err());
    }

    #[test]
    fn finalized_block_rejects_appends() {
        let mut block = tiny_block(&[1]);
        block.finalize();
        assert!(block.is_finalized());
        assert!(block.column(0).unwrap().is_finalized());
        assert!(block.append_row(vec![Value::TinyInt(2)]).is_err());
    }
}
