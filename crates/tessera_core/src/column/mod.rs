//! Typed column container.
//!
//! Rows travel through the engine as [`DataBlock`]s: a fixed set of
//! [`ColumnVector`]s of equal length, one per table column. Columns are
//! typed by [`LogicalType`] and reject values of any other type.

mod block;
mod value;
mod vector;

pub use block::DataBlock;
pub use value::{LogicalType, Value};
pub use vector::ColumnVector;
