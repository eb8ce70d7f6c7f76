//! Logical types and scalar values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    /// `bool`
    Boolean,
    /// `i8`
    TinyInt,
    /// `i16`
    SmallInt,
    /// `i32`
    Integer,
    /// `i64`
    BigInt,
    /// `f32`
    Float,
    /// `f64`
    Double,
    /// UTF-8 string
    Varchar,
}

impl LogicalType {
    /// Stable tag used by the block encoding.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Boolean => 1,
            Self::TinyInt => 2,
            Self::SmallInt => 3,
            Self::Integer => 4,
            Self::BigInt => 5,
            Self::Float => 6,
            Self::Double => 7,
            Self::Varchar => 8,
        }
    }

    /// Inverse of [`LogicalType::tag`].
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Boolean),
            2 => Some(Self::TinyInt),
            3 => Some(Self::SmallInt),
            4 => Some(Self::Integer),
            5 => Some(Self::BigInt),
            6 => Some(Self::Float),
            7 => Some(Self::Double),
            8 => Some(Self::Varchar),
            _ => None,
        }
    }

    /// Encoded width of one value, or `None` for variable-width types.
    #[must_use]
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Boolean | Self::TinyInt => Some(1),
            Self::SmallInt => Some(2),
            Self::Integer | Self::Float => Some(4),
            Self::BigInt | Self::Double => Some(8),
            Self::Varchar => None,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::TinyInt => "tinyint",
            Self::SmallInt => "smallint",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Float => "float",
            Self::Double => "double",
            Self::Varchar => "varchar",
        };
        f.write_str(name)
    }
}

/// A single typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean value.
    Boolean(bool),
    /// 8-bit integer.
    TinyInt(i8),
    /// 16-bit integer.
    SmallInt(i16),
    /// 32-bit integer.
    Integer(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// String value.
    Varchar(String),
}

impl Value {
    /// Returns the logical type of this value.
    #[must_use]
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Self::Boolean(_) => LogicalType::Boolean,
            Self::TinyInt(_) => LogicalType::TinyInt,
            Self::SmallInt(_) => LogicalType::SmallInt,
            Self::Integer(_) => LogicalType::Integer,
            Self::BigInt(_) => LogicalType::BigInt,
            Self::Float(_) => LogicalType::Float,
            Self::Double(_) => LogicalType::Double,
            Self::Varchar(_) => LogicalType::Varchar,
        }
    }
}
