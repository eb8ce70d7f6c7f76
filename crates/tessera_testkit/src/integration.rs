//! Model-checked workloads.
//!
//! [`ModelHarness`] drives a single table through imports, deletes,
//! compactions and cleanups while keeping its own model of where every live
//! row is stored, and compares the model against the database after each
//! step.

use crate::fixtures::{create_test_table, key_block, TestDatabase, TEST_TABLE};
use crate::generators::WorkloadOp;
use std::collections::BTreeMap;
use tessera_core::{
    Config, CoreResult, RowId, SegmentId, SegmentSelection, TransactionKind, Value,
    DEFAULT_DATABASE,
};

/// A database plus a model of its fixture table.
pub struct ModelHarness {
    /// The database instance.
    pub db: TestDatabase,
    /// Stored rows per active segment: the key, or `None` once deleted.
    segments: BTreeMap<SegmentId, Vec<Option<i64>>>,
    next_key: i64,
    compactions: usize,
}

impl ModelHarness {
    /// Creates a harness over an in-memory database with `config`.
    pub fn new(config: Config) -> Self {
        let db = TestDatabase::memory_with_config(config);
        create_test_table(&db, TEST_TABLE).expect("Failed to create table");
        Self {
            db,
            segments: BTreeMap::new(),
            next_key: 0,
            compactions: 0,
        }
    }

    /// Applies one workload step and checks the result against the model.
    pub fn apply(&mut self, op: &WorkloadOp) {
        match op {
            WorkloadOp::Import { rows } => self.import(*rows),
            WorkloadOp::Delete { picks } => self.delete(picks),
            WorkloadOp::CompactAll => self.compact(SegmentSelection::All),
            WorkloadOp::AutoCompact => {
                let candidates = self.policy_candidates();
                if !candidates.is_empty() {
                    self.compact(SegmentSelection::Ids(candidates));
                }
            }
            WorkloadOp::Cleanup => {
                self.db.cleanup();
            }
        }
        self.verify();
    }

    /// Imports `rows` fresh keys in one transaction.
    pub fn import(&mut self, rows: usize) {
        let first = self.next_key;
        self.db
            .transaction("model import", |txn| {
                txn.import(DEFAULT_DATABASE, TEST_TABLE, vec![key_block(first, rows)])
            })
            .expect("Failed to import");
        self.next_key += rows as i64;

        let capacity = self.db.config().segment_capacity;
        let new_ids: Vec<SegmentId> = self
            .list()
            .into_iter()
            .filter(|id| !self.segments.contains_key(id))
            .collect();
        let keys: Vec<i64> = (first..first + rows as i64).collect();
        assert_eq!(
            new_ids.len(),
            keys.chunks(capacity).count(),
            "import created an unexpected number of segments"
        );
        for (id, chunk) in new_ids.into_iter().zip(keys.chunks(capacity)) {
            self.segments
                .insert(id, chunk.iter().copied().map(Some).collect());
        }
    }

    /// Deletes the live rows at `picks`, taken modulo the live row count.
    pub fn delete(&mut self, picks: &[usize]) {
        let live = self.live_rows();
        if live.is_empty() {
            return;
        }
        let mut targets: Vec<RowId> = picks.iter().map(|p| live[p % live.len()]).collect();
        targets.sort_unstable();
        targets.dedup();

        self.db
            .transaction("model delete", |txn| {
                txn.delete(DEFAULT_DATABASE, TEST_TABLE, &targets)
            })
            .expect("Failed to delete");
        for row in targets {
            if let Some(slot) = self
                .segments
                .get_mut(&row.segment_id)
                .and_then(|rows| rows.get_mut(row.offset as usize))
            {
                *slot = None;
            }
        }
    }

    /// Compacts `selection` and moves the surviving rows in the model.
    pub fn compact(&mut self, selection: SegmentSelection) {
        let outcome = self
            .db
            .compaction()
            .run(DEFAULT_DATABASE, TEST_TABLE, selection, None)
            .expect("Failed to compact");
        let Some(outcome) = outcome else {
            return;
        };
        self.compactions += 1;

        let mut survivors = Vec::new();
        for id in &outcome.summary.sources {
            let rows = self
                .segments
                .remove(id)
                .expect("compaction source missing from model");
            survivors.extend(rows.into_iter().flatten());
        }
        assert_eq!(outcome.summary.rows_copied, survivors.len() as u64);

        let capacity = self.db.config().segment_capacity;
        let chunks: Vec<&[i64]> = survivors.chunks(capacity).collect();
        assert_eq!(outcome.summary.outputs.len(), chunks.len());
        for (id, chunk) in outcome.summary.outputs.iter().zip(chunks) {
            self.segments
                .insert(*id, chunk.iter().copied().map(Some).collect());
        }
    }

    /// Row ids of every live row in the model, in storage order.
    pub fn live_rows(&self) -> Vec<RowId> {
        self.segments
            .iter()
            .flat_map(|(id, rows)| {
                rows.iter()
                    .enumerate()
                    .filter(|(_, key)| key.is_some())
                    .map(move |(offset, _)| RowId::new(*id, offset as u32))
            })
            .collect()
    }

    /// Keys of every live row in the model, in storage order.
    pub fn expected_keys(&self) -> Vec<i64> {
        self.segments
            .values()
            .flat_map(|rows| rows.iter().flatten().copied())
            .collect()
    }

    /// Number of compactions that committed.
    pub fn compactions(&self) -> usize {
        self.compactions
    }

    /// Checks segment layout and scan output against the model.
    pub fn verify(&self) {
        let txn = self
            .db
            .begin("model verify", TransactionKind::ReadOnly)
            .expect("Failed to begin");
        let infos = txn
            .list_segments(DEFAULT_DATABASE, TEST_TABLE)
            .expect("Failed to list segments");
        let ids: Vec<SegmentId> = infos.iter().map(|s| s.segment_id).collect();
        let model_ids: Vec<SegmentId> = self.segments.keys().copied().collect();
        assert_eq!(ids, model_ids, "segment ids diverged from the model");

        for info in &infos {
            let rows = &self.segments[&info.segment_id];
            assert_eq!(info.row_count, rows.len() as u64, "{}", info.segment_id);
            assert_eq!(
                info.actual_row_count,
                rows.iter().flatten().count() as u64,
                "{}",
                info.segment_id
            );
        }

        let scanned = scan_keys(&txn).expect("Failed to scan");
        assert_eq!(scanned, self.expected_keys(), "scan diverged from the model");
    }

    fn list(&self) -> Vec<SegmentId> {
        let txn = self
            .db
            .begin("model list", TransactionKind::ReadOnly)
            .expect("Failed to begin");
        txn.list_segments(DEFAULT_DATABASE, TEST_TABLE)
            .expect("Failed to list segments")
            .into_iter()
            .map(|s| s.segment_id)
            .collect()
    }

    fn policy_candidates(&self) -> Vec<SegmentId> {
        let txn = self
            .db
            .begin("model policy", TransactionKind::ReadOnly)
            .expect("Failed to begin");
        let infos = txn
            .list_segments(DEFAULT_DATABASE, TEST_TABLE)
            .expect("Failed to list segments");
        self.db.config().compaction.select(&infos)
    }
}

fn scan_keys(txn: &tessera_core::Transaction) -> CoreResult<Vec<i64>> {
    let mut keys = Vec::new();
    for block in txn.scan(DEFAULT_DATABASE, TEST_TABLE)? {
        if let Some(column) = block.column(0) {
            for i in 0..block.row_count() {
                if let Some(Value::BigInt(key)) = column.value_at(i) {
                    keys.push(key);
                }
            }
        }
    }
    Ok(keys)
}
