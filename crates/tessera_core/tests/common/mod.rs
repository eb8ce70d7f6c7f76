//! Helpers shared by the integration tests.

#![allow(dead_code)]

use tessera_core::{
    ColumnDef, Config, ConflictPolicy, DataBlock, Database, LogicalType, RowId, SegmentId,
    SegmentInfo, TableDef, TransactionKind, Value, DEFAULT_DATABASE,
};

pub const DB: &str = DEFAULT_DATABASE;
pub const TABLE: &str = "lineitem";

/// A database with an empty two-column table.
pub fn database(config: Config) -> Database {
    let db = Database::open_in_memory_with_config(config).unwrap();
    create_table(&db, TABLE);
    db
}

pub fn create_table(db: &Database, name: &str) {
    db.transaction("create", |txn| {
        txn.create_table(
            DB,
            TableDef::new(
                name,
                vec![
                    ColumnDef::new("key", LogicalType::BigInt),
                    ColumnDef::new("tag", LogicalType::SmallInt),
                ],
            ),
            ConflictPolicy::Error,
        )
    })
    .unwrap();
}

/// Rows `first..first + count` as one block.
pub fn block(first: i64, count: usize) -> DataBlock {
    let mut block = DataBlock::with_capacity(&[LogicalType::BigInt, LogicalType::SmallInt], count);
    for key in first..first + count as i64 {
        block
            .append_row(vec![Value::BigInt(key), Value::SmallInt((key % 7) as i16)])
            .unwrap();
    }
    block
}

/// Imports `count` rows in one committed transaction.
pub fn import(db: &Database, table: &str, first: i64, count: usize) {
    db.transaction("import", |txn| txn.import(DB, table, vec![block(first, count)]))
        .unwrap();
}

/// Active segments visible to a fresh snapshot.
pub fn segments(db: &Database, table: &str) -> Vec<SegmentInfo> {
    let txn = db.begin("list", TransactionKind::ReadOnly).unwrap();
    txn.list_segments(DB, table).unwrap()
}

pub fn segment_ids(db: &Database, table: &str) -> Vec<u32> {
    segments(db, table)
        .into_iter()
        .map(|s| s.segment_id.as_u32())
        .collect()
}

/// Every live key, in scan order.
pub fn keys(db: &Database, table: &str) -> Vec<i64> {
    let txn = db.begin("scan", TransactionKind::ReadOnly).unwrap();
    scan_keys(&txn, table)
}

pub fn scan_keys(txn: &tessera_core::Transaction, table: &str) -> Vec<i64> {
    let mut keys = Vec::new();
    for block in txn.scan(DB, table).unwrap() {
        for i in 0..block.row_count() {
            match block.column(0).and_then(|c| c.value_at(i)) {
                Some(Value::BigInt(k)) => keys.push(k),
                other => panic!("unexpected key {other:?}"),
            }
        }
    }
    keys
}

pub fn row(segment: u32, offset: u32) -> RowId {
    RowId::new(SegmentId::new(segment), offset)
}

/// Deletes rows in one committed transaction.
pub fn delete(db: &Database, table: &str, rows: &[RowId]) {
    db.transaction("delete", |txn| txn.delete(DB, table, rows))
        .unwrap();
}
