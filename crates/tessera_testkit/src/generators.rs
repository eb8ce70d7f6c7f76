//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use proptest::prelude::*;
use tessera_core::{DataBlock, LogicalType, Value};

/// Strategy for generating a logical column type.
pub fn logical_type_strategy() -> impl Strategy<Value = LogicalType> {
    prop_oneof![
        Just(LogicalType::Boolean),
        Just(LogicalType::TinyInt),
        Just(LogicalType::SmallInt),
        Just(LogicalType::Integer),
        Just(LogicalType::BigInt),
        Just(LogicalType::Float),
        Just(LogicalType::Double),
        Just(LogicalType::Varchar),
    ]
}

/// Strategy for generating a value of type `ty`.
pub fn value_strategy(ty: LogicalType) -> BoxedStrategy<Value> {
    match ty {
        LogicalType::Boolean => any::<bool>().prop_map(Value::Boolean).boxed(),
        LogicalType::TinyInt => any::<i8>().prop_map(Value::TinyInt).boxed(),
        LogicalType::SmallInt => any::<i16>().prop_map(Value::SmallInt).boxed(),
        LogicalType::Integer => any::<i32>().prop_map(Value::Integer).boxed(),
        LogicalType::BigInt => any::<i64>().prop_map(Value::BigInt).boxed(),
        // Finite only: NaN != NaN.
        LogicalType::Float => (-1.0e6f32..1.0e6).prop_map(Value::Float).boxed(),
        LogicalType::Double => (-1.0e12f64..1.0e12).prop_map(Value::Double).boxed(),
        LogicalType::Varchar => prop::string::string_regex("[a-zA-Z0-9 ]{0,24}")
            .expect("Invalid regex")
            .prop_map(Value::Varchar)
            .boxed(),
    }
}

/// Strategy for generating a schema of one to `max_columns` columns.
pub fn schema_strategy(max_columns: usize) -> impl Strategy<Value = Vec<LogicalType>> {
    prop::collection::vec(logical_type_strategy(), 1..=max_columns.max(1))
}

/// Strategy for generating a finalized block of `types` with up to
/// `max_rows` rows.
pub fn data_block_strategy(
    types: Vec<LogicalType>,
    max_rows: usize,
) -> impl Strategy<Value = DataBlock> {
    let row = types
        .iter()
        .map(|&ty| value_strategy(ty))
        .collect::<Vec<_>>();
    prop::collection::vec(row, 0..=max_rows).prop_map(move |rows| {
        let mut block = DataBlock::with_capacity(&types, rows.len());
        for values in rows {
            block
                .append_row(values)
                .expect("generated row matches its schema");
        }
        block.finalize();
        block
    })
}

/// Strategy for a schema together with a block of that schema.
pub fn typed_block_strategy(max_rows: usize) -> impl Strategy<Value = DataBlock> {
    schema_strategy(4).prop_flat_map(move |types| data_block_strategy(types, max_rows))
}

/// One step of a generated workload against a single table.
#[derive(Debug, Clone)]
pub enum WorkloadOp {
    /// Import this many rows in one transaction.
    Import {
        /// Row count.
        rows: usize,
    },
    /// Delete live rows, picked by position among the rows live at the time
    /// (taken modulo the live count).
    Delete {
        /// Positions to delete.
        picks: Vec<usize>,
    },
    /// Compact every active segment.
    CompactAll,
    /// Run the automatic compaction policy.
    AutoCompact,
    /// Reclaim deprecated segments.
    Cleanup,
}

/// Strategy for generating workload steps.
pub fn workload_op_strategy(max_rows: usize) -> impl Strategy<Value = WorkloadOp> {
    prop_oneof![
        4 => (1..=max_rows.max(1)).prop_map(|rows| WorkloadOp::Import { rows }),
        3 => prop::collection::vec(any::<usize>(), 1..5)
            .prop_map(|picks| WorkloadOp::Delete { picks }),
        1 => Just(WorkloadOp::CompactAll),
        1 => Just(WorkloadOp::AutoCompact),
        1 => Just(WorkloadOp::Cleanup),
    ]
}

/// Strategy for generating a sequence of workload steps.
pub fn workload_strategy(
    min_ops: usize,
    max_ops: usize,
    max_rows: usize,
) -> impl Strategy<Value = Vec<WorkloadOp>> {
    prop::collection::vec(workload_op_strategy(max_rows), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn generated_values_match_their_type(
            (ty, value) in logical_type_strategy()
                .prop_flat_map(|ty| (Just(ty), value_strategy(ty)))
        ) {
            prop_assert_eq!(value.logical_type(), ty);
        }

        #[test]
        fn generated_blocks_are_finalized(block in typed_block_strategy(20)) {
            prop_assert!(block.is_finalized());
            prop_assert!(block.row_count() <= 20);
            prop_assert!(block.column_count() >= 1);
        }

        #[test]
        fn workload_imports_are_non_empty(ops in workload_strategy(1, 20, 8)) {
            for op in ops {
                if let WorkloadOp::Import { rows } = op {
                    prop_assert!((1..=8).contains(&rows));
                }
            }
        }
    }
}
