//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use std::path::PathBuf;
use tempfile::TempDir;
use tessera_core::{
    ColumnDef, Config, ConflictPolicy, CoreResult, DataBlock, Database, LogicalType, TableDef,
    Value, DEFAULT_DATABASE,
};
use tessera_storage::InMemoryBackend;

/// Name of the table the fixtures create.
pub const TEST_TABLE: &str = "events";

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with_config(Config::default())
    }

    /// Creates an in-memory test database with a custom configuration.
    pub fn memory_with_config(config: Config) -> Self {
        Self {
            db: Database::open_in_memory_with_config(config)
                .expect("Failed to open in-memory database"),
            _temp_dir: None,
        }
    }

    /// Creates an in-memory database whose block storage fails after
    /// `bytes` bytes.
    pub fn with_storage_limit(config: Config, bytes: u64) -> Self {
        let backend = InMemoryBackend::with_capacity_limit(bytes);
        Self {
            db: Database::open_with_backend(config, Box::new(backend))
                .expect("Failed to open limited database"),
            _temp_dir: None,
        }
    }

    /// Creates a new file-based test database.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(temp_dir.path(), Config::default())
            .expect("Failed to open file database");
        Self {
            db,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use tessera_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         create_test_table(db, "t").unwrap();
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &std::path::Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, &path)
}

/// Column types of the fixture table: a key and a payload.
pub fn test_types() -> Vec<LogicalType> {
    vec![LogicalType::BigInt, LogicalType::Varchar]
}

/// Creates the fixture table `name` in the default database.
///
/// # Errors
///
/// Any error from the create transaction.
pub fn create_test_table(db: &Database, name: &str) -> CoreResult<()> {
    create_fixture_table(db, name, ConflictPolicy::Error)
}

/// Creates the fixture table `name` unless it already exists.
///
/// # Errors
///
/// Any error from the create transaction other than the table existing.
pub fn ensure_test_table(db: &Database, name: &str) -> CoreResult<()> {
    create_fixture_table(db, name, ConflictPolicy::Ignore)
}

fn create_fixture_table(db: &Database, name: &str, policy: ConflictPolicy) -> CoreResult<()> {
    db.transaction("create fixture table", |txn| {
        txn.create_table(
            DEFAULT_DATABASE,
            TableDef::new(
                name,
                vec![
                    ColumnDef::new("key", LogicalType::BigInt),
                    ColumnDef::new("payload", LogicalType::Varchar),
                ],
            ),
            policy,
        )
    })
}

/// Rows with keys `first..first + count` for the fixture table.
pub fn key_block(first: i64, count: usize) -> DataBlock {
    let mut block = DataBlock::with_capacity(&test_types(), count);
    for key in first..first + count as i64 {
        block
            .append_row(vec![Value::BigInt(key), Value::Varchar(format!("row-{key}"))])
            .expect("fixture row matches fixture types");
    }
    block
}

/// Reads every live key of `table` at a fresh snapshot, in scan order.
///
/// # Errors
///
/// Any error from the read transaction.
pub fn live_keys(db: &Database, table: &str) -> CoreResult<Vec<i64>> {
    let txn = db.begin("live keys", tessera_core::TransactionKind::ReadOnly)?;
    let mut keys = Vec::new();
    for block in txn.scan(DEFAULT_DATABASE, table)? {
        let column = block.column(0).expect("fixture table has a key column");
        for i in 0..block.row_count() {
            if let Some(Value::BigInt(key)) = column.value_at(i) {
                keys.push(key);
            }
        }
    }
    Ok(keys)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a database whose fixture table holds `segments` segments of
    /// `rows` rows each, one import transaction per segment. Keys run from
    /// zero upwards.
    pub fn many_small_segments(config: Config, segments: usize, rows: usize) -> TestDatabase {
        let test_db = TestDatabase::memory_with_config(config);
        create_test_table(&test_db, TEST_TABLE).expect("Failed to create table");
        for s in 0..segments {
            let first = (s * rows) as i64;
            test_db
                .transaction("fixture import", |txn| {
                    txn.import(DEFAULT_DATABASE, TEST_TABLE, vec![key_block(first, rows)])
                })
                .expect("Failed to import rows");
        }
        test_db
    }

    /// The 1 + 10 + 100 import layout: 111 segments of `block_rows` rows
    /// each, a single block apiece while `block_rows` fits the default block
    /// capacity.
    pub fn one_ten_hundred(block_rows: usize) -> TestDatabase {
        many_small_segments(Config::default(), 111, block_rows)
    }
}
