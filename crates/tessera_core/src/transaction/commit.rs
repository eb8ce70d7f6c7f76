//! Commit validation and apply.
//!
//! Both phases run under the manager's commit lock with the catalog write
//! lock held. [`validate`] only reads; it checks every buffered write against
//! the current table version state and decides what apply will do.
//! [`apply`] then mutates. Every precondition apply relies on has been checked
//! by `validate`, so an error from `apply` means a broken invariant.

use crate::catalog::{Catalog, ConflictPolicy};
use crate::error::{CoreError, CoreResult};
use crate::segment::SegmentEntry;
use crate::table::TableState;
use crate::transaction::write_set::{CompactWrite, DeleteWrite, ImportWrite, WriteOp};
use crate::types::{SegmentId, TableId, TransactionId, Timestamp};
use std::collections::HashSet;

/// What apply does with one write.
#[derive(Debug)]
pub(crate) enum OpPlan {
    Apply,
    /// A create or drop made moot under `ConflictPolicy::Ignore`.
    Skip,
    /// A compaction, with the source deletes committed since its begin
    /// translated to output rows.
    Compact { carried: Vec<(SegmentId, u32)> },
}

/// Counts of what a commit changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CommitEffects {
    pub rows_imported: u64,
    pub rows_deleted: u64,
    pub segments_created: u64,
    pub segments_deprecated: u64,
    pub compactions: u64,
    pub carried_deletes: u64,
}

struct Validator<'a> {
    catalog: &'a Catalog,
    txn_id: TransactionId,
    begin_ts: Timestamp,
    dropped_here: HashSet<TableId>,
    created_here: HashSet<(String, String)>,
}

/// Checks every write of a transaction against the current state.
pub(crate) fn validate(
    catalog: &Catalog,
    txn_id: TransactionId,
    begin_ts: Timestamp,
    writes: &[WriteOp],
) -> CoreResult<Vec<OpPlan>> {
    let mut v = Validator {
        catalog,
        txn_id,
        begin_ts,
        dropped_here: HashSet::new(),
        created_here: HashSet::new(),
    };
    writes.iter().map(|w| v.validate_op(w)).collect()
}

impl Validator<'_> {
    fn validate_op(&mut self, write: &WriteOp) -> CoreResult<OpPlan> {
        match write {
            WriteOp::CreateTable {
                database,
                def,
                policy,
            } => {
                if !self.catalog.has_database(database) {
                    return Err(CoreError::DatabaseNotFound {
                        name: database.clone(),
                    });
                }
                let key = (database.clone(), def.name.clone());
                let taken = self
                    .catalog
                    .live_table(database, &def.name)
                    .is_some_and(|t| !self.dropped_here.contains(&t.table_id()))
                    || self.created_here.contains(&key);
                if taken {
                    return match policy {
                        ConflictPolicy::Ignore => Ok(OpPlan::Skip),
                        ConflictPolicy::Error => Err(CoreError::TableExists {
                            database: database.clone(),
                            table: def.name.clone(),
                        }),
                    };
                }
                self.created_here.insert(key);
                Ok(OpPlan::Apply)
            }
            WriteOp::DropTable {
                table_id,
                name,
                policy,
            } => {
                let gone = self.catalog.table(*table_id).map_or(true, TableState::is_dropped)
                    || self.dropped_here.contains(table_id);
                if gone {
                    return match policy {
                        ConflictPolicy::Ignore => Ok(OpPlan::Skip),
                        ConflictPolicy::Error => Err(CoreError::conflict(
                            self.txn_id,
                            format!("table {name} was dropped by a concurrent transaction"),
                        )),
                    };
                }
                self.dropped_here.insert(*table_id);
                Ok(OpPlan::Apply)
            }
            WriteOp::Import(w) => {
                self.validate_import(w)?;
                Ok(OpPlan::Apply)
            }
            WriteOp::Delete(w) => {
                self.validate_delete(w)?;
                Ok(OpPlan::Apply)
            }
            WriteOp::Compact(w) => {
                let carried = self.validate_compact(w)?;
                Ok(OpPlan::Compact { carried })
            }
        }
    }

    /// Resolves the table instance a write is bound to.
    ///
    /// An instance dropped after this transaction began is a conflict.
    fn live_table(&self, table_id: TableId) -> CoreResult<&TableState> {
        match self.catalog.table(table_id) {
            Some(t) if !t.is_dropped() => Ok(t),
            Some(t) => Err(CoreError::conflict(
                self.txn_id,
                format!("table {} ({table_id}) was dropped", t.name()),
            )),
            None => Err(CoreError::conflict(
                self.txn_id,
                format!("table {table_id} no longer exists"),
            )),
        }
    }

    fn validate_import(&self, w: &ImportWrite) -> CoreResult<()> {
        let table = self.live_table(w.table_id)?;
        for segment in &w.segments {
            if table.segment(segment.id).is_some() {
                return Err(CoreError::invariant(format!(
                    "imported segment {} already exists in {}",
                    segment.id,
                    table.name()
                )));
            }
        }
        Ok(())
    }

    fn validate_delete(&self, w: &DeleteWrite) -> CoreResult<()> {
        let table = self.live_table(w.table_id)?;
        for (&segment_id, offsets) in &w.rows {
            let segment = table.segment(segment_id).ok_or_else(|| {
                CoreError::conflict(
                    self.txn_id,
                    format!("segment {segment_id} was compacted and reclaimed"),
                )
            })?;
            if !segment.is_active() {
                return Err(CoreError::conflict(
                    self.txn_id,
                    format!("segment {segment_id} was compacted"),
                ));
            }
            for &offset in offsets {
                if offset >= segment.row_count {
                    return Err(CoreError::invariant(format!(
                        "delete of {segment_id}/{offset} past the last row"
                    )));
                }
                if let Some(ts) = segment.deletes.deleted_at(offset) {
                    return Err(CoreError::conflict(
                        self.txn_id,
                        format!("row {segment_id}/{offset} was deleted at {ts}"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_compact(&self, w: &CompactWrite) -> CoreResult<Vec<(SegmentId, u32)>> {
        let table = self.live_table(w.table_id)?;
        w.check()?;
        for output in &w.outputs {
            if table.segment(output.id).is_some() {
                return Err(CoreError::invariant(format!(
                    "compaction output {} already exists in {}",
                    output.id,
                    table.name()
                )));
            }
        }

        let mut carried = Vec::new();
        for source in &w.sources {
            let segment = table.segment(source.segment_id).ok_or_else(|| {
                CoreError::conflict(
                    self.txn_id,
                    format!("source segment {} no longer exists", source.segment_id),
                )
            })?;
            if !segment.is_active() {
                return Err(CoreError::conflict(
                    self.txn_id,
                    format!(
                        "source segment {} was compacted by another transaction",
                        source.segment_id
                    ),
                ));
            }
            segment.check_invariants()?;
            if segment.row_count != source.row_count {
                return Err(CoreError::invariant(format!(
                    "source segment {} has {} rows, compaction saw {}",
                    source.segment_id, segment.row_count, source.row_count
                )));
            }
            for (offset, _) in segment.deletes.deleted_after(self.begin_ts) {
                let target = w.locate(source, offset).ok_or_else(|| {
                    CoreError::invariant(format!(
                        "row {}/{offset} deleted after the compaction began was not copied",
                        source.segment_id
                    ))
                })?;
                carried.push(target);
            }
        }
        Ok(carried)
    }
}

/// Applies validated writes at `ts`.
pub(crate) fn apply(
    catalog: &mut Catalog,
    writes: Vec<WriteOp>,
    plan: Vec<OpPlan>,
    ts: Timestamp,
) -> CoreResult<CommitEffects> {
    let mut effects = CommitEffects::default();
    for (write, plan) in writes.into_iter().zip(plan) {
        if matches!(plan, OpPlan::Skip) {
            continue;
        }
        match write {
            WriteOp::CreateTable { database, def, .. } => {
                catalog.create_table(&database, def, ts)?;
            }
            WriteOp::DropTable { table_id, .. } => {
                catalog.drop_table(table_id, ts)?;
            }
            WriteOp::Import(w) => {
                let table = table_mut(catalog, w.table_id)?;
                effects.rows_imported += w.rows;
                for sealed in w.segments {
                    table.insert_segment(SegmentEntry::from_sealed(sealed, ts))?;
                    effects.segments_created += 1;
                }
            }
            WriteOp::Delete(w) => {
                let table = table_mut(catalog, w.table_id)?;
                for (segment_id, offsets) in w.rows {
                    let segment = segment_mut(table, segment_id)?;
                    for offset in offsets {
                        segment.deletes.mark(offset, ts);
                        effects.rows_deleted += 1;
                    }
                }
            }
            WriteOp::Compact(w) => {
                let carried = match plan {
                    OpPlan::Compact { carried } => carried,
                    _ => Vec::new(),
                };
                let table = table_mut(catalog, w.table_id)?;
                for source in &w.sources {
                    segment_mut(table, source.segment_id)?.deprecate(ts)?;
                    effects.segments_deprecated += 1;
                }
                for sealed in w.outputs {
                    table.insert_segment(SegmentEntry::from_sealed(sealed, ts))?;
                    effects.segments_created += 1;
                }
                for (segment_id, offset) in carried {
                    segment_mut(table, segment_id)?.deletes.mark(offset, ts);
                    effects.carried_deletes += 1;
                }
                effects.compactions += 1;
            }
        }
    }
    Ok(effects)
}

fn table_mut(catalog: &mut Catalog, id: TableId) -> CoreResult<&mut TableState> {
    catalog
        .table_mut(id)
        .ok_or_else(|| CoreError::invariant(format!("table {id} vanished during commit")))
}

fn segment_mut(table: &mut TableState, id: SegmentId) -> CoreResult<&mut SegmentEntry> {
    let name = table.name().to_string();
    table
        .segment_mut(id)
        .ok_or_else(|| CoreError::segment_not_found(name, id))
}
