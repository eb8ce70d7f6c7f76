//! Scenario command implementation.

use serde::Serialize;
use std::cell::RefCell;
use std::path::Path;
use tessera_core::{
    CleanupResult, ColumnDef, CompactOutcome, Config, ConflictPolicy, CoreResult, DataBlock,
    Database, LogicalType, RowId, SegmentInfo, SegmentSelection, StatsSnapshot, TableDef,
    TransactionKind, Value, DEFAULT_DATABASE,
};
use tracing::info;

/// Table the scenario works on.
pub const SCENARIO_TABLE: &str = "scenario";

/// Which segments the scenario compacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compaction {
    /// Every active segment.
    All,
    /// The segments the configured policy selects.
    Auto,
    /// None.
    Skip,
}

/// Scenario parameters.
#[derive(Debug, Clone)]
pub struct ScenarioOptions {
    /// Import transactions.
    pub imports: usize,
    /// Rows per import.
    pub rows: usize,
    /// Delete every Nth row before compacting; zero disables.
    pub delete_every: usize,
    /// Delete every Nth row from inside the compaction window; zero
    /// disables.
    pub delete_during: usize,
    /// Compaction mode.
    pub compact: Compaction,
}

/// What the scenario did.
#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    /// Storage backend name.
    pub backend: String,
    /// Rows imported.
    pub rows_imported: u64,
    /// Rows deleted before the compaction.
    pub deleted_before: usize,
    /// Rows deleted by a transaction that committed during the compaction.
    pub deleted_during: usize,
    /// Segments before the compaction.
    pub segments_before: Vec<SegmentInfo>,
    /// The compaction, if one committed.
    pub compaction: Option<CompactOutcome>,
    /// Segments after the compaction.
    pub segments_after: Vec<SegmentInfo>,
    /// Live rows at the end.
    pub live_rows: u64,
    /// Cleanup run after the compaction.
    pub cleanup: CleanupResult,
    /// Engine counters.
    pub stats: StatsSnapshot,
}

/// Runs the scenario against a database at `path`, or in memory.
pub fn run(
    path: Option<&Path>,
    config: Config,
    options: &ScenarioOptions,
) -> Result<ScenarioReport, Box<dyn std::error::Error>> {
    let db = match path {
        Some(path) => Database::open(path, config)?,
        None => Database::open_in_memory_with_config(config)?,
    };
    let backend = db.txn_manager().blocks().backend_name().to_string();

    db.transaction("create scenario table", |txn| {
        txn.create_table(
            DEFAULT_DATABASE,
            TableDef::new(
                SCENARIO_TABLE,
                vec![
                    ColumnDef::new("key", LogicalType::BigInt),
                    ColumnDef::new("bucket", LogicalType::Integer),
                ],
            ),
            ConflictPolicy::Ignore,
        )
    })?;

    for i in 0..options.imports {
        let first = (i * options.rows) as i64;
        db.transaction("scenario import", |txn| {
            txn.import(DEFAULT_DATABASE, SCENARIO_TABLE, vec![rows(first, options.rows)])
        })?;
    }
    let rows_imported = (options.imports * options.rows) as u64;
    info!(imports = options.imports, rows = rows_imported, "scenario imported");

    let segments_before = list(&db)?;
    let positions = row_positions(&segments_before);

    let before: Vec<RowId> = every_nth(&positions, options.delete_every).collect();
    if !before.is_empty() {
        db.transaction("scenario delete", |txn| {
            txn.delete(DEFAULT_DATABASE, SCENARIO_TABLE, &before)
        })?;
    }
    let during: Vec<RowId> = every_nth(&positions, options.delete_during)
        .filter(|row| before.binary_search(row).is_err())
        .collect();

    let during_result: RefCell<Option<CoreResult<()>>> = RefCell::new(None);
    let hook = || {
        if !during.is_empty() {
            let result = db.transaction("scenario concurrent delete", |txn| {
                txn.delete(DEFAULT_DATABASE, SCENARIO_TABLE, &during)
            });
            *during_result.borrow_mut() = Some(result);
        }
    };

    let selection = match options.compact {
        Compaction::All => Some(SegmentSelection::All),
        Compaction::Auto => {
            let ids = db.config().compaction.select(&segments_before);
            (!ids.is_empty()).then_some(SegmentSelection::Ids(ids))
        }
        Compaction::Skip => None,
    };
    let compaction = match selection {
        Some(selection) => db
            .compaction()
            .run(DEFAULT_DATABASE, SCENARIO_TABLE, selection, Some(&hook))?,
        None => None,
    };
    if let Some(result) = during_result.into_inner() {
        result?;
    }

    let cleanup = db.cleanup();
    let segments_after = list(&db)?;
    let live_rows = segments_after.iter().map(|s| s.actual_row_count).sum();
    db.shutdown()?;

    Ok(ScenarioReport {
        backend,
        rows_imported,
        deleted_before: before.len(),
        deleted_during: if compaction.is_some() { during.len() } else { 0 },
        segments_before,
        compaction,
        segments_after,
        live_rows,
        cleanup,
        stats: db.stats(),
    })
}

/// Prints a report for humans.
pub fn print_text(report: &ScenarioReport) {
    println!("Scenario on {} storage", report.backend);
    println!("  Rows imported:        {}", report.rows_imported);
    println!("  Deleted before:       {}", report.deleted_before);
    println!("  Deleted during:       {}", report.deleted_during);
    println!();
    println!("Segments before compaction: {}", report.segments_before.len());
    print_segments(&report.segments_before);
    println!();
    match &report.compaction {
        Some(outcome) => {
            println!(
                "Compaction committed at {}: {} sources -> {} outputs, {} rows copied",
                outcome.commit_ts,
                outcome.summary.sources.len(),
                outcome.summary.outputs.len(),
                outcome.summary.rows_copied
            );
        }
        None => println!("No compaction"),
    }
    println!();
    println!("Segments after compaction: {}", report.segments_after.len());
    print_segments(&report.segments_after);
    println!();
    println!("Live rows:            {}", report.live_rows);
    println!(
        "Cleanup:              {} segments reclaimed below {}",
        report.cleanup.segments_reclaimed, report.cleanup.horizon
    );
    println!(
        "Transactions:         {} committed, {} rolled back, {} conflicts",
        report.stats.transactions_committed,
        report.stats.transactions_rolled_back,
        report.stats.conflicts
    );
    println!(
        "Blocks:               {} written ({} bytes), {} read",
        report.stats.blocks_written, report.stats.bytes_written, report.stats.blocks_read
    );
}

fn print_segments(segments: &[SegmentInfo]) {
    const SHOWN: usize = 8;
    for info in segments.iter().take(SHOWN) {
        println!(
            "  {:>10}  {:<10}  rows={:<10} live={:<10} blocks={}",
            info.segment_id.to_string(),
            info.status.to_string(),
            info.row_count,
            info.actual_row_count,
            info.block_count
        );
    }
    if segments.len() > SHOWN {
        println!("  ... {} more", segments.len() - SHOWN);
    }
}

fn rows(first: i64, count: usize) -> DataBlock {
    let mut block = DataBlock::with_capacity(&[LogicalType::BigInt, LogicalType::Integer], count);
    for key in first..first + count as i64 {
        // Infallible: the values match the block's types.
        let _ = block.append_row(vec![Value::BigInt(key), Value::Integer((key % 97) as i32)]);
    }
    block
}

fn list(db: &Database) -> CoreResult<Vec<SegmentInfo>> {
    let txn = db.begin("scenario list", TransactionKind::ReadOnly)?;
    txn.list_segments(DEFAULT_DATABASE, SCENARIO_TABLE)
}

/// Every row id of `segments`, in storage order.
fn row_positions(segments: &[SegmentInfo]) -> Vec<RowId> {
    segments
        .iter()
        .flat_map(|s| (0..s.row_count as u32).map(move |offset| RowId::new(s.segment_id, offset)))
        .collect()
}

fn every_nth(positions: &[RowId], n: usize) -> impl Iterator<Item = RowId> + '_ {
    positions
        .iter()
        .copied()
        .enumerate()
        .filter(move |(i, _)| n > 0 && i % n == 0)
        .map(|(_, row)| row)
}
