//! The compaction write of a transaction.

use crate::error::{CoreError, CoreResult};
use crate::segment::{BlockEntry, DeleteBitmap, SegmentWriter};
use crate::transaction::{for_each_live_run, CompactSource, CompactWrite, Transaction, WriteKind, WriteOp};
use crate::types::{SegmentId, TableId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// What a buffered compaction will do when committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactSummary {
    /// Table instance the compaction is bound to.
    pub table_id: TableId,
    /// Segments that will be deprecated.
    pub sources: Vec<SegmentId>,
    /// Segments that will replace them.
    pub outputs: Vec<SegmentId>,
    /// Live rows copied.
    pub rows_copied: u64,
    /// Row blocks written for the outputs.
    pub blocks_written: usize,
}

struct SourceSnapshot {
    segment_id: SegmentId,
    row_count: u32,
    blocks: Vec<BlockEntry>,
    deletes: DeleteBitmap,
}

impl Transaction {
    /// Merges `segment_ids` of `db.table` into new segments.
    ///
    /// The table is resolved at this transaction's snapshot and the
    /// compaction stays bound to that table instance: if it is dropped (or
    /// dropped and recreated under the same name) before commit, the commit
    /// fails with a conflict. Duplicate ids are ignored; sources are merged
    /// in id order.
    ///
    /// The compaction must be the only write of the transaction.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty id list
    /// - `TableNotFound` / `DatabaseNotFound` if the table is not visible
    /// - `SegmentNotFound` for an id that is unknown or deprecated as of this
    ///   snapshot
    /// - `TransactionConflict` if a source was compacted by a transaction
    ///   that committed after this one began
    /// - block storage errors while rewriting
    pub fn compact(
        &mut self,
        db: &str,
        table: &str,
        segment_ids: &[SegmentId],
    ) -> CoreResult<CompactSummary> {
        self.ensure_writable(WriteKind::Compact)?;
        if segment_ids.is_empty() {
            return Err(CoreError::invalid_argument("no segments to compact"));
        }
        let ids: BTreeSet<SegmentId> = segment_ids.iter().copied().collect();
        let begin_ts = self.begin_ts();
        let txn_id = self.id();

        let snapshot = self.with_table(db, table, |t| {
            let mut sources = Vec::with_capacity(ids.len());
            for &id in &ids {
                let segment = t
                    .visible_segment(id, begin_ts)
                    .ok_or_else(|| CoreError::segment_not_found(table, id))?;
                if !segment.is_active() {
                    return Err(CoreError::conflict(
                        txn_id,
                        format!("segment {id} was compacted by another transaction"),
                    ));
                }
                sources.push(SourceSnapshot {
                    segment_id: id,
                    row_count: segment.row_count,
                    blocks: segment.blocks.clone(),
                    deletes: segment.deletes.clone(),
                });
            }
            Ok((t.table_id(), Arc::clone(t.def()), sources))
        });
        let (table_id, def, snapshots) = match snapshot {
            Ok(s) => s,
            Err(err) => return Err(self.doom(err)),
        };

        let shared = Arc::clone(&self.shared);
        let config = &shared.config;
        let segment_capacity = u32::try_from(config.segment_capacity)
            .map_err(|_| CoreError::invalid_argument("segment capacity exceeds u32"))?;
        let mut writer = SegmentWriter::new(
            &shared.blocks,
            def.types(),
            config.block_capacity,
            config.segment_capacity,
            || shared.allocate_segment_id(table_id),
        );

        let mut sources = Vec::with_capacity(snapshots.len());
        for src in snapshots {
            let output_start = writer.rows_written();
            let mut copied = Vec::new();
            for entry in &src.blocks {
                let block = shared.blocks.read_block(&entry.handle)?;
                for_each_live_run(&block, entry, &src.deletes, begin_ts, |start, len| {
                    copied.extend((start..start + len).map(|i| entry.start_offset + i as u32));
                    writer.append(&block, start, len)
                })?;
            }
            sources.push(CompactSource {
                segment_id: src.segment_id,
                row_count: src.row_count,
                copied,
                output_start,
            });
        }
        let outputs = writer.finish()?;

        let write = CompactWrite {
            table_id,
            sources,
            outputs,
            segment_capacity,
        };
        write.check()?;

        let summary = CompactSummary {
            table_id,
            sources: write.sources.iter().map(|s| s.segment_id).collect(),
            outputs: write.outputs.iter().map(|o| o.id).collect(),
            rows_copied: write.rows_copied(),
            blocks_written: write.outputs.iter().map(|o| o.blocks.len()).sum(),
        };
        debug!(
            txn = %txn_id,
            %table,
            sources = summary.sources.len(),
            outputs = ?summary.outputs,
            rows_copied = summary.rows_copied,
            "compaction buffered"
        );
        self.writes.push(WriteOp::Compact(write));
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ConflictPolicy, TableDef, DEFAULT_DATABASE};
    use crate::column::{DataBlock, LogicalType, Value};
    use crate::config::Config;
    use crate::transaction::{TransactionKind, TransactionManager};
    use crate::types::RowId;

    fn setup(segments: usize, rows: i32) -> TransactionManager {
        let tm = TransactionManager::in_memory(
            Config::new().block_capacity(4).segment_capacity(8),
        );
        let mut txn = tm.begin("create", TransactionKind::Normal).unwrap();
        txn.create_table(
            DEFAULT_DATABASE,
            TableDef::new("t", vec![ColumnDef::new("v", LogicalType::Integer)]),
            ConflictPolicy::Error,
        )
        .unwrap();
        tm.commit(&mut txn).unwrap();

        for s in 0..segments {
            let mut block = DataBlock::new(&[LogicalType::Integer]);
            for r in 0..rows {
                block.append_row(vec![Value::Integer(s as i32 * 100 + r)]).unwrap();
            }
            let mut txn = tm.begin("import", TransactionKind::Normal).unwrap();
            txn.import(DEFAULT_DATABASE, "t", vec![block]).unwrap();
            tm.commit(&mut txn).unwrap();
        }
        tm
    }

    fn ids(raw: &[u32]) -> Vec<SegmentId> {
        raw.iter().copied().map(SegmentId::new).collect()
    }

    #[test]
    fn compaction_skips_deleted_rows() {
        let tm = setup(2, 3);
        let mut del = tm.begin("delete", TransactionKind::Normal).unwrap();
        del.delete(DEFAULT_DATABASE, "t", &[RowId::new(SegmentId::new(0), 1)])
            .unwrap();
        tm.commit(&mut del).unwrap();

        let mut txn = tm.begin("compact", TransactionKind::Compact).unwrap();
        let summary = txn.compact(DEFAULT_DATABASE, "t", &ids(&[1, 0, 1])).unwrap();
        assert_eq!(summary.sources, ids(&[0, 1]));
        assert_eq!(summary.outputs, ids(&[2]));
        assert_eq!(summary.rows_copied, 5);
        assert_eq!(summary.blocks_written, 2);
    }

    #[test]
    fn outputs_split_at_segment_capacity() {
        let tm = setup(3, 6);
        let mut txn = tm.begin("compact", TransactionKind::Compact).unwrap();
        let summary = txn.compact(DEFAULT_DATABASE, "t", &ids(&[0, 1, 2])).unwrap();
        assert_eq!(summary.rows_copied, 18);
        assert_eq!(summary.outputs, ids(&[3, 4, 5]));

        let infos: Vec<u64> = summary
            .outputs
            .iter()
            .map(|&id| txn.get_segment_info(DEFAULT_DATABASE, "t", id).unwrap().row_count)
            .collect();
        assert_eq!(infos, vec![8, 8, 2]);
    }

    #[test]
    fn sources_are_hidden_from_the_compacting_transaction() {
        let tm = setup(2, 2);
        let mut txn = tm.begin("compact", TransactionKind::Compact).unwrap();
        txn.compact(DEFAULT_DATABASE, "t", &ids(&[0, 1])).unwrap();

        assert!(txn
            .get_segment_info(DEFAULT_DATABASE, "t", SegmentId::new(0))
            .unwrap_err()
            .is_not_found());
        let listed: Vec<SegmentId> = txn
            .list_segments(DEFAULT_DATABASE, "t")
            .unwrap()
            .into_iter()
            .map(|s| s.segment_id)
            .collect();
        assert_eq!(listed, ids(&[2]));
    }

    #[test]
    fn unknown_or_empty_selection_is_rejected() {
        let tm = setup(1, 2);
        let mut txn = tm.begin("compact", TransactionKind::Compact).unwrap();
        assert!(matches!(
            txn.compact(DEFAULT_DATABASE, "t", &[]),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert!(txn
            .compact(DEFAULT_DATABASE, "t", &ids(&[0, 9]))
            .unwrap_err()
            .is_not_found());
        assert!(txn
            .compact(DEFAULT_DATABASE, "missing", &ids(&[0]))
            .unwrap_err()
            .is_not_found());
        assert_eq!(txn.write_count(), 0);
    }

    #[test]
    fn compaction_must_be_the_only_write() {
        let tm = setup(1, 2);
        let mut txn = tm.begin("mixed", TransactionKind::Normal).unwrap();
        txn.delete(DEFAULT_DATABASE, "t", &[RowId::new(SegmentId::new(0), 0)])
            .unwrap();
        assert!(matches!(
            txn.compact(DEFAULT_DATABASE, "t", &ids(&[0])),
            Err(CoreError::InvalidOperation { .. })
        ));
    }
}
