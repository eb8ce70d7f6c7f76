//! Stress tests for Tessera.
//!
//! These tests verify behavior under heavy load and concurrent access,
//! in particular deletes racing compactions of the same segments.

use crate::fixtures::{ensure_test_table, key_block, live_keys, TEST_TABLE};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tessera_core::{Database, RowId, SegmentSelection, TransactionKind, DEFAULT_DATABASE};

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }

    /// Renders the result as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Outcome of [`stress_delete_compaction_race`].
#[derive(Debug, Clone, Serialize)]
pub struct RaceResult {
    /// Delete transactions, committed or not.
    pub deletes: StressTestResult,
    /// Deletes rejected with a conflict.
    pub delete_conflicts: usize,
    /// Compactions that committed.
    pub compactions: usize,
    /// Rows imported before the race.
    pub rows_imported: usize,
    /// Live rows after the race.
    pub rows_live: usize,
}

impl RaceResult {
    /// Whether every committed delete, and only those, removed a row.
    pub fn rows_conserved(&self) -> bool {
        self.rows_live + self.deletes.successful_ops == self.rows_imported
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Rows per import transaction.
    pub rows_per_import: usize,
    /// Import transactions run before a race starts.
    pub initial_imports: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            rows_per_import: 64,
            initial_imports: 32,
        }
    }
}

/// Run a sequential import stress test.
pub fn stress_sequential_imports(db: &Database, config: &StressConfig) -> StressTestResult {
    ensure_test_table(db, TEST_TABLE).expect("create test table");
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let first = (i * config.rows_per_import) as i64;
        match db.transaction("stress import", |txn| {
            txn.import(
                DEFAULT_DATABASE,
                TEST_TABLE,
                vec![key_block(first, config.rows_per_import)],
            )
        }) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a concurrent import stress test. Imports never conflict, so every
/// one of them should commit.
pub fn stress_concurrent_imports(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    ensure_test_table(&db, TEST_TABLE).expect("create test table");
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads.max(1);
    let rows = config.rows_per_import;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let first = ((t * ops_per_thread + i) * rows) as i64;
                    let result = db.transaction("stress import", |txn| {
                        txn.import(DEFAULT_DATABASE, TEST_TABLE, vec![key_block(first, rows)])
                    });
                    match result {
                        Ok(()) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Races single-row deletes from `config.threads` threads against a thread
/// that keeps compacting the whole table.
///
/// Each deleter picks a row from its own snapshot of the segment list. A
/// delete may lose to a compaction (conflict) or to another deleter, which
/// counts as a failed operation; a committed delete must remove exactly one
/// row.
pub fn stress_delete_compaction_race(db: Arc<Database>, config: &StressConfig) -> RaceResult {
    ensure_test_table(&db, TEST_TABLE).expect("create test table");
    for i in 0..config.initial_imports {
        let first = (i * config.rows_per_import) as i64;
        db.transaction("race setup", |txn| {
            txn.import(
                DEFAULT_DATABASE,
                TEST_TABLE,
                vec![key_block(first, config.rows_per_import)],
            )
        })
        .expect("Failed to import");
    }
    let rows_imported = config.initial_imports * config.rows_per_import;

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();

    let compactor = {
        let db = Arc::clone(&db);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut compactions = 0usize;
            while !done.load(Ordering::Acquire) {
                if db
                    .compact(DEFAULT_DATABASE, TEST_TABLE, SegmentSelection::All)
                    .is_some()
                {
                    compactions += 1;
                }
                db.cleanup();
            }
            compactions
        })
    };

    let deleters: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let conflicts = Arc::clone(&conflicts);

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let result = db.transaction("stress delete", |txn| {
                        let segments = txn.list_segments(DEFAULT_DATABASE, TEST_TABLE)?;
                        let pick = t.wrapping_mul(7919).wrapping_add(i.wrapping_mul(31));
                        let Some(segment) = segments
                            .iter()
                            .filter(|s| s.row_count > 0)
                            .nth(pick % segments.len().max(1))
                        else {
                            return Err(tessera_core::CoreError::invalid_argument("table is empty"));
                        };
                        let offset = (pick as u64 % segment.row_count) as u32;
                        txn.delete(
                            DEFAULT_DATABASE,
                            TEST_TABLE,
                            &[RowId::new(segment.segment_id, offset)],
                        )
                    });
                    match result {
                        Ok(()) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            if err.is_conflict() {
                                conflicts.fetch_add(1, Ordering::Relaxed);
                            }
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in deleters {
        handle.join().expect("Thread panicked");
    }
    done.store(true, Ordering::Release);
    let compactions = compactor.join().expect("Thread panicked");

    let deletes = StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    );
    let rows_live = live_keys(&db, TEST_TABLE).map_or(0, |keys| keys.len());

    RaceResult {
        deletes,
        delete_conflicts: conflicts.load(Ordering::Relaxed),
        compactions,
        rows_imported,
        rows_live,
    }
}

/// Holds a reader open across many compactions and checks that its view
/// never changes. Returns the number of re-reads that matched.
pub fn stress_long_reader(db: &Database, config: &StressConfig) -> StressTestResult {
    ensure_test_table(db, TEST_TABLE).expect("create test table");
    for i in 0..config.initial_imports {
        let first = (i * config.rows_per_import) as i64;
        let _ = db.transaction("reader setup", |txn| {
            txn.import(
                DEFAULT_DATABASE,
                TEST_TABLE,
                vec![key_block(first, config.rows_per_import)],
            )
        });
    }

    let Ok(reader) = db.begin("long reader", TransactionKind::ReadOnly) else {
        return StressTestResult::new(0, config.operations, Duration::ZERO);
    };
    let row_count = |txn: &tessera_core::Transaction| {
        txn.scan(DEFAULT_DATABASE, TEST_TABLE)
            .map(|blocks| blocks.iter().map(|b| b.row_count()).sum::<usize>())
    };
    let expected = row_count(&reader).ok();

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;
    for i in 0..config.operations {
        let first = ((config.initial_imports + i) * config.rows_per_import) as i64;
        let _ = db.transaction("reader churn", |txn| {
            txn.import(DEFAULT_DATABASE, TEST_TABLE, vec![key_block(first, 1)])
        });
        db.compact(DEFAULT_DATABASE, TEST_TABLE, SegmentSelection::All);
        db.cleanup();

        if row_count(&reader).ok() == expected {
            successful += 1;
        } else {
            failed += 1;
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Config;

    fn create_test_db() -> Database {
        Database::open_in_memory_with_config(Config::new().block_capacity(16).segment_capacity(64))
            .expect("Failed to create database")
    }

    #[test]
    fn test_sequential_imports() {
        let db = create_test_db();
        let config = StressConfig {
            operations: 100,
            rows_per_import: 10,
            ..Default::default()
        };

        let result = stress_sequential_imports(&db, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(live_keys(&db, TEST_TABLE).unwrap().len(), 1_000);
    }

    #[test]
    fn test_concurrent_imports() {
        let db = Arc::new(create_test_db());
        let config = StressConfig {
            operations: 200,
            threads: 4,
            rows_per_import: 5,
            ..Default::default()
        };

        let result = stress_concurrent_imports(Arc::clone(&db), &config);
        assert_eq!(result.failed_ops, 0);
        let mut keys = live_keys(&db, TEST_TABLE).unwrap();
        keys.sort_unstable();
        assert_eq!(keys, (0..1_000).collect::<Vec<_>>());
    }

    #[test]
    fn test_delete_compaction_race_conserves_rows() {
        let db = Arc::new(create_test_db());
        let config = StressConfig {
            operations: 400,
            threads: 4,
            rows_per_import: 20,
            initial_imports: 10,
        };

        let result = stress_delete_compaction_race(Arc::clone(&db), &config);
        assert!(result.rows_conserved(), "{}", serde_json::to_string(&result).unwrap());
        assert_eq!(db.txn_manager().active_count(), 0);
        assert_eq!(result.deletes.total_ops, 400);
    }

    #[test]
    fn test_long_reader_is_stable() {
        let db = create_test_db();
        let config = StressConfig {
            operations: 50,
            rows_per_import: 8,
            initial_imports: 4,
            ..Default::default()
        };

        let result = stress_long_reader(&db, &config);
        assert_eq!(result.failed_ops, 0);
        assert!(result.to_json().contains("\"successful_ops\": 50"));
    }

    #[test]
    fn test_runs_share_one_table() {
        let db = create_test_db();
        let config = StressConfig {
            operations: 10,
            rows_per_import: 3,
            ..Default::default()
        };

        stress_sequential_imports(&db, &config);
        let result = stress_sequential_imports(&db, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(live_keys(&db, TEST_TABLE).unwrap().len(), 60);
    }

    #[test]
    #[should_panic(expected = "create test table")]
    fn test_setup_failure_is_reported() {
        let db = create_test_db();
        db.shutdown().unwrap();
        stress_sequential_imports(&db, &StressConfig::default());
    }

    #[test]
    fn test_ensure_test_table_is_idempotent() {
        let db = create_test_db();
        ensure_test_table(&db, TEST_TABLE).unwrap();
        ensure_test_table(&db, TEST_TABLE).unwrap();
        assert!(crate::fixtures::create_test_table(&db, TEST_TABLE).is_err());
    }
}
