//! Compaction entry points.

use crate::compaction::CompactSummary;
use crate::error::CoreResult;
use crate::transaction::{Transaction, TransactionKind, TransactionManager};
use crate::types::{SegmentId, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Which segments of a table to compact.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SegmentSelection {
    /// Every segment active at the compaction's snapshot.
    #[default]
    All,
    /// The listed segments.
    Ids(Vec<SegmentId>),
}

/// A committed compaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactOutcome {
    /// Commit timestamp of the compaction transaction.
    pub commit_ts: Timestamp,
    /// What was merged.
    pub summary: CompactSummary,
}

/// Runs compactions as their own transactions.
#[derive(Debug, Clone)]
pub struct CompactionProcessor {
    manager: TransactionManager,
}

impl CompactionProcessor {
    /// Creates a processor over `manager`.
    #[must_use]
    pub fn new(manager: TransactionManager) -> Self {
        Self { manager }
    }

    /// Compacts `selection` of `db.table` and returns the commit timestamp.
    ///
    /// `hook` runs after the rows are rewritten and before the commit. It
    /// exists so tests can commit a competing transaction at exactly that
    /// point.
    ///
    /// Returns `None` when there was nothing to compact or the compaction
    /// could not complete: the table is gone, a source was compacted or
    /// dropped concurrently, or storage failed. Nothing is changed in that
    /// case and the call can simply be retried.
    pub fn manual_compact(
        &self,
        db: &str,
        table: &str,
        selection: SegmentSelection,
        hook: Option<&dyn Fn()>,
    ) -> Option<Timestamp> {
        match self.run(db, table, selection, hook) {
            Ok(outcome) => outcome.map(|o| o.commit_ts),
            Err(err) => {
                self.manager.stats().record_compaction_abandoned();
                warn!(%table, error = %err, "compaction abandoned");
                None
            }
        }
    }

    /// Compacts the small segments picked by the configured
    /// [`CompactionPolicy`](super::CompactionPolicy).
    ///
    /// Returns `None` if the policy found too few candidates or the
    /// compaction could not complete.
    pub fn auto_compact(&self, db: &str, table: &str) -> Option<Timestamp> {
        let candidates = {
            let txn = self.manager.begin("auto-compact-select", TransactionKind::ReadOnly).ok()?;
            let segments = match txn.list_segments(db, table) {
                Ok(s) => s,
                Err(err) => {
                    debug!(%table, error = %err, "auto compaction skipped");
                    return None;
                }
            };
            self.manager.config().compaction.select(&segments)
        };
        if candidates.is_empty() {
            debug!(%table, "no compaction candidates");
            return None;
        }
        self.manual_compact(db, table, SegmentSelection::Ids(candidates), None)
    }

    /// Compacts `selection` of `db.table`, reporting failures as errors.
    ///
    /// Returns `Ok(None)` when the selection resolves to no segments. A
    /// failed compaction transaction is always rolled back.
    ///
    /// # Errors
    ///
    /// Any error from resolving, rewriting or committing the compaction.
    pub fn run(
        &self,
        db: &str,
        table: &str,
        selection: SegmentSelection,
        hook: Option<&dyn Fn()>,
    ) -> CoreResult<Option<CompactOutcome>> {
        let mut txn = self.manager.begin(format!("compact {table}"), TransactionKind::Compact)?;
        let result = self.compact_in(&mut txn, db, table, selection, hook);
        if txn.is_running() {
            self.manager.rollback(&mut txn)?;
        }
        result
    }

    fn compact_in(
        &self,
        txn: &mut Transaction,
        db: &str,
        table: &str,
        selection: SegmentSelection,
        hook: Option<&dyn Fn()>,
    ) -> CoreResult<Option<CompactOutcome>> {
        let ids = match selection {
            SegmentSelection::Ids(ids) => ids,
            SegmentSelection::All => txn
                .list_segments(db, table)?
                .into_iter()
                .map(|s| s.segment_id)
                .collect(),
        };
        if ids.is_empty() {
            debug!(%table, "nothing to compact");
            return Ok(None);
        }

        let summary = txn.compact(db, table, &ids)?;
        if let Some(hook) = hook {
            hook();
        }
        let commit_ts = self.manager.commit(txn)?;
        info!(
            %table,
            %commit_ts,
            sources = summary.sources.len(),
            outputs = summary.outputs.len(),
            rows = summary.rows_copied,
            "compaction committed"
        );
        Ok(Some(CompactOutcome { commit_ts, summary }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ConflictPolicy, TableDef, DEFAULT_DATABASE};
    use crate::column::{DataBlock, LogicalType, Value};
    use crate::compaction::CompactionPolicy;
    use crate::config::Config;
    use crate::types::RowId;
    use std::cell::Cell;

    fn setup(config: Config, segments: usize) -> TransactionManager {
        let tm = TransactionManager::in_memory(config);
        let mut txn = tm.begin("create", TransactionKind::Normal).unwrap();
        txn.create_table(
            DEFAULT_DATABASE,
            TableDef::new("t", vec![ColumnDef::new("v", LogicalType::BigInt)]),
            ConflictPolicy::Error,
        )
        .unwrap();
        tm.commit(&mut txn).unwrap();
        for s in 0..segments {
            let mut block = DataBlock::new(&[LogicalType::BigInt]);
            for r in 0..3 {
                block.append_row(vec![Value::BigInt((s * 10 + r) as i64)]).unwrap();
            }
            let mut txn = tm.begin("import", TransactionKind::Normal).unwrap();
            txn.import(DEFAULT_DATABASE, "t", vec![block]).unwrap();
            tm.commit(&mut txn).unwrap();
        }
        tm
    }

    fn active_ids(tm: &TransactionManager) -> Vec<u32> {
        let txn = tm.begin("read", TransactionKind::ReadOnly).unwrap();
        txn.list_segments(DEFAULT_DATABASE, "t")
            .unwrap()
            .into_iter()
            .map(|s| s.segment_id.as_u32())
            .collect()
    }

    #[test]
    fn compacts_all_segments() {
        let tm = setup(Config::default(), 3);
        let processor = CompactionProcessor::new(tm.clone());
        let ts = processor
            .manual_compact(DEFAULT_DATABASE, "t", SegmentSelection::All, None)
            .unwrap();
        assert_eq!(tm.current_ts(), ts);
        assert_eq!(active_ids(&tm), vec![3]);
        assert_eq!(tm.stats().compactions_committed(), 1);
        assert_eq!(tm.active_count(), 0);
    }

    #[test]
    fn hook_runs_between_rewrite_and_commit() {
        let tm = setup(Config::default(), 2);
        let processor = CompactionProcessor::new(tm.clone());
        let called = Cell::new(false);
        let hook = || {
            assert_eq!(tm.active_count(), 1);
            called.set(true);
        };
        let ts = processor.manual_compact(
            DEFAULT_DATABASE,
            "t",
            SegmentSelection::Ids(vec![SegmentId::new(0)]),
            Some(&hook),
        );
        assert!(ts.is_some());
        assert!(called.get());
        assert_eq!(active_ids(&tm), vec![1, 2]);
    }

    #[test]
    fn missing_table_or_empty_selection_yields_none() {
        let tm = setup(Config::default(), 1);
        let processor = CompactionProcessor::new(tm.clone());
        assert!(processor
            .manual_compact(DEFAULT_DATABASE, "nope", SegmentSelection::All, None)
            .is_none());
        assert!(processor
            .manual_compact(DEFAULT_DATABASE, "t", SegmentSelection::Ids(vec![]), None)
            .is_none());
        assert_eq!(tm.active_count(), 0);
        assert_eq!(tm.stats().compactions_abandoned(), 1);
        assert_eq!(active_ids(&tm), vec![0]);
    }

    #[test]
    fn losing_compaction_is_abandoned() {
        let tm = setup(Config::default(), 2);
        let processor = CompactionProcessor::new(tm.clone());
        let rival = processor.clone();
        let hook = || {
            assert!(rival
                .manual_compact(DEFAULT_DATABASE, "t", SegmentSelection::All, None)
                .is_some());
        };
        let ts = processor.manual_compact(DEFAULT_DATABASE, "t", SegmentSelection::All, Some(&hook));
        assert!(ts.is_none());
        assert_eq!(tm.stats().compactions_committed(), 1);
        assert_eq!(tm.stats().compactions_abandoned(), 1);
        assert_eq!(active_ids(&tm), vec![3]);
    }

    #[test]
    fn auto_compact_follows_policy() {
        let config = Config::default().compaction(
            CompactionPolicy::new().small_segment_rows(3).min_segments(2),
        );
        let tm = setup(config, 3);

        // Only segments with fewer than three live rows qualify.
        assert!(CompactionProcessor::new(tm.clone())
            .auto_compact(DEFAULT_DATABASE, "t")
            .is_none());

        let mut txn = tm.begin("delete", TransactionKind::Normal).unwrap();
        txn.delete(
            DEFAULT_DATABASE,
            "t",
            &[
                RowId::new(SegmentId::new(0), 0),
                RowId::new(SegmentId::new(2), 1),
            ],
        )
        .unwrap();
        tm.commit(&mut txn).unwrap();

        assert!(CompactionProcessor::new(tm.clone())
            .auto_compact(DEFAULT_DATABASE, "t")
            .is_some());
        assert_eq!(active_ids(&tm), vec![1, 3]);
    }
}
