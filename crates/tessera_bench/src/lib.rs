//! Benchmark utilities.

#![allow(missing_docs)]

use rand::Rng;
use tessera_core::{
    ColumnDef, Config, ConflictPolicy, DataBlock, Database, LogicalType, RowId, TableDef,
    TransactionKind, Value, DEFAULT_DATABASE,
};

pub const BENCH_TABLE: &str = "bench";

/// Column types of the benchmark table.
pub fn bench_types() -> Vec<LogicalType> {
    vec![LogicalType::BigInt, LogicalType::Double, LogicalType::Varchar]
}

/// Generate a block of `rows` random rows starting at key `first`.
pub fn random_block(first: i64, rows: usize) -> DataBlock {
    let mut rng = rand::thread_rng();
    let mut block = DataBlock::with_capacity(&bench_types(), rows);
    for key in first..first + rows as i64 {
        let tag: u32 = rng.gen_range(0..10_000);
        block
            .append_row(vec![
                Value::BigInt(key),
                Value::Double(rng.gen()),
                Value::Varchar(format!("tag-{tag}")),
            ])
            .unwrap();
    }
    block
}

/// Open an in-memory database holding an empty benchmark table.
pub fn bench_database(config: Config) -> Database {
    let db = Database::open_in_memory_with_config(config).unwrap();
    db.transaction("create", |txn| {
        txn.create_table(
            DEFAULT_DATABASE,
            TableDef::new(
                BENCH_TABLE,
                vec![
                    ColumnDef::new("key", LogicalType::BigInt),
                    ColumnDef::new("score", LogicalType::Double),
                    ColumnDef::new("tag", LogicalType::Varchar),
                ],
            ),
            ConflictPolicy::Error,
        )
    })
    .unwrap();
    db
}

/// Import `segments` transactions of `rows` rows each.
pub fn populate(db: &Database, segments: usize, rows: usize) {
    for s in 0..segments {
        let block = random_block((s * rows) as i64, rows);
        db.transaction("populate", |txn| {
            txn.import(DEFAULT_DATABASE, BENCH_TABLE, vec![block])
        })
        .unwrap();
    }
}

/// Every `n`th live row id, in storage order.
pub fn every_nth_row(db: &Database, n: usize) -> Vec<RowId> {
    let txn = db.begin("rows", TransactionKind::ReadOnly).unwrap();
    txn.list_segments(DEFAULT_DATABASE, BENCH_TABLE)
        .unwrap()
        .iter()
        .flat_map(|s| (0..s.row_count as u32).map(move |offset| RowId::new(s.segment_id, offset)))
        .step_by(n.max(1))
        .collect()
}
