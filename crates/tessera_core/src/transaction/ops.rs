//! Reads and buffered writes of a transaction.

use crate::catalog::{ConflictPolicy, TableDef};
use crate::column::DataBlock;
use crate::error::{CoreError, CoreResult};
use crate::segment::{BlockEntry, DeleteBitmap, SegmentInfo, SegmentStatus, SegmentWriter};
use crate::table::{TableInfo, TableState};
use crate::transaction::state::{Transaction, WriteKind};
use crate::transaction::write_set::{DeleteWrite, ImportWrite, WriteOp};
use crate::types::{RowId, SegmentId, TableId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

impl Transaction {
    /// Runs `f` against the table instance `db.table` as seen by this
    /// transaction's snapshot, with the catalog read lock held.
    pub(crate) fn with_table<R>(
        &self,
        db: &str,
        table: &str,
        f: impl FnOnce(&TableState) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let catalog = self.shared.catalog.read();
        let state = catalog.resolve(db, table, self.begin_ts())?;
        f(state)
    }

    /// Imports rows into new segments owned by this transaction.
    ///
    /// Rows are packed into blocks of the configured block capacity and
    /// segments of the configured segment capacity. Blocks are written to
    /// block storage right away; the segments become visible to others only
    /// when the transaction commits.
    ///
    /// # Errors
    ///
    /// - `TableNotFound` / `DatabaseNotFound` if the table is not visible
    /// - `InvalidArgument` if there are no rows or a block does not match the
    ///   table schema
    /// - `InvalidOperation` for read-only and compact transactions
    pub fn import(&mut self, db: &str, table: &str, blocks: Vec<DataBlock>) -> CoreResult<()> {
        self.ensure_writable(WriteKind::Import)?;
        if blocks.iter().all(DataBlock::is_empty) {
            return Err(CoreError::invalid_argument(format!(
                "nothing to import into {table}"
            )));
        }
        let (table_id, def) =
            self.with_table(db, table, |t| Ok((t.table_id(), Arc::clone(t.def()))))?;
        let types = def.types();
        if let Some(idx) = blocks.iter().position(|b| b.types() != types) {
            return Err(CoreError::invalid_argument(format!(
                "block {idx} does not match the schema of {table}"
            )));
        }

        let shared = Arc::clone(&self.shared);
        let config = &shared.config;
        let mut writer = SegmentWriter::new(
            &shared.blocks,
            types,
            config.block_capacity,
            config.segment_capacity,
            || shared.allocate_segment_id(table_id),
        );
        for block in &blocks {
            writer.append_block(block)?;
        }
        let rows = writer.rows_written();
        let segments = writer.finish()?;

        tracing::debug!(
            txn = %self.id(),
            %table,
            rows,
            segments = segments.len(),
            "import buffered"
        );
        self.writes.push(WriteOp::Import(ImportWrite {
            table_id,
            segments,
            rows,
        }));
        Ok(())
    }

    /// Deletes rows by id.
    ///
    /// Duplicate ids in `row_ids` are ignored.
    ///
    /// # Errors
    ///
    /// - `SegmentNotFound` for a segment this snapshot never saw
    /// - `TransactionConflict` if a target segment has been compacted, or a
    ///   target row was deleted by a transaction that committed after this
    ///   one began. The transaction is then doomed: its commit fails with the
    ///   same conflict, and it should be rolled back.
    /// - `InvalidArgument` for an offset past the end of its segment or a row
    ///   already deleted as of this snapshot
    pub fn delete(&mut self, db: &str, table: &str, row_ids: &[RowId]) -> CoreResult<()> {
        self.ensure_writable(WriteKind::Delete)?;
        if row_ids.is_empty() {
            return Err(CoreError::invalid_argument("no rows to delete"));
        }

        let mut grouped: BTreeMap<SegmentId, BTreeSet<u32>> = BTreeMap::new();
        for row in row_ids {
            grouped.entry(row.segment_id).or_default().insert(row.offset);
        }

        let begin_ts = self.begin_ts();
        let txn_id = self.id();
        let result = self.with_table(db, table, |t| {
            let pending = self.pending_deletes(t.table_id());
            for (&segment_id, offsets) in &grouped {
                let segment = t
                    .segment(segment_id)
                    .filter(|s| s.create_ts <= begin_ts)
                    .ok_or_else(|| CoreError::segment_not_found(table, segment_id))?;
                if !segment.is_active() {
                    return Err(CoreError::conflict(
                        txn_id,
                        format!("segment {segment_id} was compacted"),
                    ));
                }
                for &offset in offsets {
                    let row = RowId::new(segment_id, offset);
                    if offset >= segment.row_count {
                        return Err(CoreError::invalid_argument(format!(
                            "row {row} is past the end of a {}-row segment",
                            segment.row_count
                        )));
                    }
                    match segment.deletes.deleted_at(offset) {
                        Some(ts) if ts <= begin_ts => {
                            return Err(CoreError::invalid_argument(format!(
                                "row {row} is already deleted"
                            )))
                        }
                        Some(ts) => {
                            return Err(CoreError::conflict(
                                txn_id,
                                format!("row {row} was deleted at {ts}"),
                            ))
                        }
                        None => {}
                    }
                    if pending.is_some_and(|p| p.contains(segment_id, offset)) {
                        return Err(CoreError::invalid_argument(format!(
                            "row {row} is already deleted by this transaction"
                        )));
                    }
                }
            }
            Ok(t.table_id())
        });

        let table_id = match result {
            Ok(id) => id,
            Err(err) => return Err(self.doom(err)),
        };

        let deleted = grouped.values().map(BTreeSet::len).sum::<usize>();
        match self.writes.iter_mut().find_map(|w| match w {
            WriteOp::Delete(d) if d.table_id == table_id => Some(d),
            _ => None,
        }) {
            Some(existing) => {
                for (segment_id, offsets) in grouped {
                    existing.rows.entry(segment_id).or_default().extend(offsets);
                }
            }
            None => self.writes.push(WriteOp::Delete(DeleteWrite {
                table_id,
                rows: grouped,
            })),
        }
        tracing::debug!(txn = %txn_id, %table, rows = deleted, "delete buffered");
        Ok(())
    }

    fn pending_deletes(&self, table_id: TableId) -> Option<&DeleteWrite> {
        self.writes.iter().find_map(|w| match w {
            WriteOp::Delete(d) if d.table_id == table_id => Some(d),
            _ => None,
        })
    }

    /// Creates a table.
    ///
    /// The new table is visible to transactions that begin after this one
    /// commits, not to this transaction.
    ///
    /// # Errors
    ///
    /// Returns `TableExists` under [`ConflictPolicy::Error`] if the name is
    /// taken, `InvalidArgument` for a bad definition, and `DatabaseNotFound`.
    pub fn create_table(
        &mut self,
        db: &str,
        def: TableDef,
        policy: ConflictPolicy,
    ) -> CoreResult<()> {
        self.ensure_writable(WriteKind::Ddl)?;
        def.validate()?;

        let visible = {
            let catalog = self.shared.catalog.read();
            if !catalog.has_database(db) {
                return Err(CoreError::DatabaseNotFound {
                    name: db.to_string(),
                });
            }
            catalog
                .resolve(db, &def.name, self.begin_ts())
                .ok()
                .map(TableState::table_id)
        };
        let dropped_here = |id: TableId| {
            self.writes
                .iter()
                .any(|w| matches!(w, WriteOp::DropTable { table_id, .. } if *table_id == id))
        };
        let created_here = self.writes.iter().any(|w| {
            matches!(w, WriteOp::CreateTable { database, def: d, .. }
                if database == db && d.name == def.name)
        });
        if created_here || visible.is_some_and(|id| !dropped_here(id)) {
            return match policy {
                ConflictPolicy::Ignore => Ok(()),
                ConflictPolicy::Error => Err(CoreError::TableExists {
                    database: db.to_string(),
                    table: def.name,
                }),
            };
        }

        self.writes.push(WriteOp::CreateTable {
            database: db.to_string(),
            def: Arc::new(def),
            policy,
        });
        Ok(())
    }

    /// Drops a table.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` under [`ConflictPolicy::Error`] if the table is
    /// not visible to this transaction.
    pub fn drop_table(&mut self, db: &str, table: &str, policy: ConflictPolicy) -> CoreResult<()> {
        self.ensure_writable(WriteKind::Ddl)?;
        let table_id = match self.with_table(db, table, |t| Ok(t.table_id())) {
            Ok(id) => id,
            Err(err) if err.is_not_found() && policy == ConflictPolicy::Ignore => return Ok(()),
            Err(err) => return Err(err),
        };
        let already = self
            .writes
            .iter()
            .any(|w| matches!(w, WriteOp::DropTable { table_id: id, .. } if *id == table_id));
        if already {
            return match policy {
                ConflictPolicy::Ignore => Ok(()),
                ConflictPolicy::Error => Err(CoreError::table_not_found(db, table)),
            };
        }
        self.writes.push(WriteOp::DropTable {
            table_id,
            name: table.to_string(),
            policy,
        });
        Ok(())
    }

    /// Describes one segment as seen by this transaction.
    ///
    /// Segments this transaction imported or produced by compaction are
    /// visible to it before commit (with no create timestamp); sources it
    /// compacted are not.
    ///
    /// # Errors
    ///
    /// Returns `SegmentNotFound` for an id that does not exist or is
    /// deprecated as of this snapshot.
    pub fn get_segment_info(
        &self,
        db: &str,
        table: &str,
        segment_id: SegmentId,
    ) -> CoreResult<SegmentInfo> {
        self.ensure_running()?;
        let (table_id, committed) = self.with_table(db, table, |t| {
            Ok((
                t.table_id(),
                t.visible_segment(segment_id, self.begin_ts())
                    .map(|s| s.info(self.begin_ts())),
            ))
        })?;

        if let Some(own) = self.own_segment_info(table_id, segment_id) {
            return Ok(own);
        }
        committed
            .filter(|_| !self.compacts_away(table_id, segment_id))
            .ok_or_else(|| CoreError::segment_not_found(table, segment_id))
    }

    /// Lists the segments visible to this transaction, in id order.
    pub fn list_segments(&self, db: &str, table: &str) -> CoreResult<Vec<SegmentInfo>> {
        self.ensure_running()?;
        let (table_id, mut infos) = self.with_table(db, table, |t| {
            Ok((t.table_id(), t.segment_infos(self.begin_ts())))
        })?;
        infos.retain(|info| !self.compacts_away(table_id, info.segment_id));
        infos.extend(self.own_segments(table_id).map(|(_, info)| info));
        infos.sort_by_key(|info| info.segment_id);
        Ok(infos)
    }

    /// Summarizes the committed table as seen by this snapshot.
    pub fn get_table_info(&self, db: &str, table: &str) -> CoreResult<TableInfo> {
        self.ensure_running()?;
        self.with_table(db, table, |t| Ok(t.info(self.begin_ts())))
    }

    /// Reads every live row of the committed table as of this snapshot.
    ///
    /// Returns one block per stored block that still has live rows, in
    /// segment and offset order. Rows this transaction deleted or imported
    /// are not reflected.
    pub fn scan(&self, db: &str, table: &str) -> CoreResult<Vec<DataBlock>> {
        self.ensure_running()?;
        let begin_ts = self.begin_ts();
        let sources: Vec<(Vec<BlockEntry>, DeleteBitmap)> = self.with_table(db, table, |t| {
            Ok(t.visible_segments(begin_ts)
                .map(|s| (s.blocks.clone(), s.deletes.clone()))
                .collect())
        })?;

        let mut out = Vec::new();
        for (blocks, deletes) in sources {
            for entry in blocks {
                let block = self.shared.blocks.read_block(&entry.handle)?;
                let live = live_rows(&block, &entry, &deletes, begin_ts)?;
                if !live.is_empty() {
                    out.push(live);
                }
            }
        }
        Ok(out)
    }

    fn own_segments(&self, table_id: TableId) -> impl Iterator<Item = (SegmentId, SegmentInfo)> + '_ {
        self.writes
            .iter()
            .flat_map(move |w| {
                let segments = match w {
                    WriteOp::Import(i) if i.table_id == table_id => i.segments.as_slice(),
                    WriteOp::Compact(c) if c.table_id == table_id => c.outputs.as_slice(),
                    _ => &[][..],
                };
                segments.iter()
            })
            .map(|s| {
                (
                    s.id,
                    SegmentInfo {
                        segment_id: s.id,
                        status: SegmentStatus::Active,
                        row_count: u64::from(s.row_count),
                        actual_row_count: u64::from(s.row_count),
                        block_count: s.blocks.len(),
                        create_ts: None,
                        deprecate_ts: None,
                    },
                )
            })
    }

    fn own_segment_info(&self, table_id: TableId, segment_id: SegmentId) -> Option<SegmentInfo> {
        self.own_segments(table_id)
            .find(|(id, _)| *id == segment_id)
            .map(|(_, info)| info)
    }

    fn compacts_away(&self, table_id: TableId, segment_id: SegmentId) -> bool {
        self.writes.iter().any(|w| match w {
            WriteOp::Compact(c) if c.table_id == table_id => {
                c.sources.iter().any(|s| s.segment_id == segment_id)
            }
            _ => false,
        })
    }
}

/// Copies the rows of `block` that are live at `ts` into a new block.
pub(crate) fn live_rows(
    block: &DataBlock,
    entry: &BlockEntry,
    deletes: &DeleteBitmap,
    ts: crate::types::Timestamp,
) -> CoreResult<DataBlock> {
    let mut out = DataBlock::with_capacity(&block.types(), block.row_count());
    for_each_live_run(block, entry, deletes, ts, |start, len| {
        out.extend_from(block, start, len)
    })?;
    Ok(out)
}

/// Calls `f(start, len)` for every maximal run of rows of `block` that are
/// live at `ts`.
pub(crate) fn for_each_live_run(
    block: &DataBlock,
    entry: &BlockEntry,
    deletes: &DeleteBitmap,
    ts: crate::types::Timestamp,
    mut f: impl FnMut(usize, usize) -> CoreResult<()>,
) -> CoreResult<()> {
    let rows = block.row_count();
    let mut run: Option<usize> = None;
    for i in 0..rows {
        let offset = entry.start_offset + i as u32;
        if deletes.is_deleted_at(offset, ts) {
            if let Some(start) = run.take() {
                f(start, i - start)?;
            }
        } else {
            run.get_or_insert(i);
        }
    }
    if let Some(start) = run {
        f(start, rows - start)?;
    }
    Ok(())
}
