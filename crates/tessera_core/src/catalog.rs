//! In-memory catalog.
//!
//! Databases map table names to the ordered list of table instances created
//! under that name. A name lookup at snapshot `ts` returns the instance that
//! was live at `ts`, so dropping and recreating a table never changes what an
//! older snapshot resolves to.

use crate::column::LogicalType;
use crate::error::{CoreError, CoreResult};
use crate::table::TableState;
use crate::types::{TableId, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the database that always exists.
pub const DEFAULT_DATABASE: &str = "default_db";

/// What to do when a create or drop finds the catalog in the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Treat the operation as a no-op.
    Ignore,
    /// Fail the operation.
    #[default]
    Error,
}

/// Definition of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column type.
    pub logical_type: LogicalType,
}

impl ColumnDef {
    /// Creates a column definition.
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
        }
    }
}

/// Definition of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns in order.
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Creates a table definition.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Returns the column types in order.
    pub fn types(&self) -> Vec<LogicalType> {
        self.columns.iter().map(|c| c.logical_type).collect()
    }

    /// Checks that the definition is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty name, no columns, or duplicate
    /// column names.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::invalid_argument("table name must not be empty"));
        }
        if self.columns.is_empty() {
            return Err(CoreError::invalid_argument(format!(
                "table {} has no columns",
                self.name
            )));
        }
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(CoreError::invalid_argument(format!(
                    "table {} has duplicate column {}",
                    self.name, col.name
                )));
            }
        }
        Ok(())
    }
}

/// Databases, table names and table instances.
#[derive(Debug)]
pub struct Catalog {
    databases: HashMap<String, HashMap<String, Vec<TableId>>>,
    tables: HashMap<TableId, TableState>,
    next_table_id: u64,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// Creates a catalog holding only the empty default database.
    pub fn new() -> Self {
        let mut databases = HashMap::new();
        databases.insert(DEFAULT_DATABASE.to_string(), HashMap::new());
        Self {
            databases,
            tables: HashMap::new(),
            next_table_id: 1,
        }
    }

    /// Returns whether a database exists.
    pub fn has_database(&self, db: &str) -> bool {
        self.databases.contains_key(db)
    }

    fn versions(&self, db: &str, name: &str) -> CoreResult<&[TableId]> {
        let tables = self
            .databases
            .get(db)
            .ok_or_else(|| CoreError::DatabaseNotFound {
                name: db.to_string(),
            })?;
        Ok(tables.get(name).map_or(&[][..], Vec::as_slice))
    }

    /// Resolves `db.name` as seen by a snapshot at `ts`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound` or `TableNotFound`.
    pub fn resolve(&self, db: &str, name: &str, ts: Timestamp) -> CoreResult<&TableState> {
        self.versions(db, name)?
            .iter()
            .rev()
            .filter_map(|id| self.tables.get(id))
            .find(|t| t.is_live_at(ts))
            .ok_or_else(|| CoreError::table_not_found(db, name))
    }

    /// Returns the instance of `db.name` that no committed transaction has
    /// dropped, if any.
    pub fn live_table(&self, db: &str, name: &str) -> Option<&TableState> {
        let last = *self.versions(db, name).ok()?.last()?;
        self.tables.get(&last).filter(|t| !t.is_dropped())
    }

    /// Returns a table instance by identity.
    pub fn table(&self, id: TableId) -> Option<&TableState> {
        self.tables.get(&id)
    }

    pub(crate) fn table_mut(&mut self, id: TableId) -> Option<&mut TableState> {
        self.tables.get_mut(&id)
    }

    /// Iterates over every tracked table instance.
    pub fn tables(&self) -> impl Iterator<Item = &TableState> {
        self.tables.values()
    }

    /// Registers a new table instance committed at `ts`.
    ///
    /// The caller has already checked name conflicts.
    pub(crate) fn create_table(
        &mut self,
        db: &str,
        def: Arc<TableDef>,
        ts: Timestamp,
    ) -> CoreResult<TableId> {
        let versions = self
            .databases
            .get_mut(db)
            .ok_or_else(|| CoreError::DatabaseNotFound {
                name: db.to_string(),
            })?
            .entry(def.name.clone())
            .or_default();
        let id = TableId::new(self.next_table_id);
        self.next_table_id += 1;
        versions.push(id);
        self.tables.insert(id, TableState::new(id, def, ts));
        Ok(id)
    }

    /// Marks a table instance dropped at `ts`.
    pub(crate) fn drop_table(&mut self, id: TableId, ts: Timestamp) -> CoreResult<()> {
        let table = self
            .tables
            .get_mut(&id)
            .ok_or_else(|| CoreError::invariant(format!("dropping unknown table {id}")))?;
        if table.is_dropped() {
            return Err(CoreError::invariant(format!("table {id} dropped twice")));
        }
        table.mark_dropped(ts);
        Ok(())
    }

    /// Forgets deprecated segments and dropped tables that no snapshot at or
    /// after `horizon` can see.
    ///
    /// Returns `(segments, tables)` reclaimed. Segments of a reclaimed table
    /// are not counted separately.
    pub(crate) fn reclaim(&mut self, horizon: Timestamp) -> (usize, usize) {
        let mut segments = 0;
        for table in self.tables.values_mut() {
            segments += table.reclaim(horizon);
        }

        let dead: Vec<TableId> = self
            .tables
            .values()
            .filter(|t| t.drop_ts().is_some_and(|d| d < horizon))
            .map(TableState::table_id)
            .collect();
        for id in &dead {
            self.tables.remove(id);
        }
        for tables in self.databases.values_mut() {
            tables.retain(|_, versions| {
                versions.retain(|id| !dead.contains(id));
                !versions.is_empty()
            });
        }
        (segments, dead.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str) -> Arc<TableDef> {
        Arc::new(TableDef::new(
            name,
            vec![ColumnDef::new("c", LogicalType::TinyInt)],
        ))
    }

    #[test]
    fn default_database_exists() {
        let catalog = Catalog::new();
        assert!(catalog.has_database(DEFAULT_DATABASE));
        let err = catalog
            .resolve("nope", "t", Timestamp::new(1))
            .unwrap_err();
        assert!(matches!(err, CoreError::DatabaseNotFound { .. }));
    }

    #[test]
    fn resolve_follows_snapshot() {
        let mut catalog = Catalog::new();
        let first = catalog
            .create_table(DEFAULT_DATABASE, def("t"), Timestamp::new(2))
            .unwrap();
        catalog.drop_table(first, Timestamp::new(4)).unwrap();
        let second = catalog
            .create_table(DEFAULT_DATABASE, def("t"), Timestamp::new(6))
            .unwrap();

        let at = |ts| {
            catalog
                .resolve(DEFAULT_DATABASE, "t", Timestamp::new(ts))
                .map(TableState::table_id)
        };
        assert!(at(1).unwrap_err().is_not_found());
        assert_eq!(at(3).unwrap(), first);
        assert!(at(5).is_err());
        assert_eq!(at(6).unwrap(), second);
        assert_ne!(first, second);

        assert_eq!(
            catalog.live_table(DEFAULT_DATABASE, "t").map(TableState::table_id),
            Some(second)
        );
    }

    #[test]
    fn drop_twice_is_an_invariant_violation() {
        let mut catalog = Catalog::new();
        let id = catalog
            .create_table(DEFAULT_DATABASE, def("t"), Timestamp::new(2))
            .unwrap();
        catalog.drop_table(id, Timestamp::new(3)).unwrap();
        assert!(catalog.drop_table(id, Timestamp::new(4)).is_err());
        assert!(catalog.live_table(DEFAULT_DATABASE, "t").is_none());
    }

    #[test]
    fn reclaim_forgets_old_drops() {
        let mut catalog = Catalog::new();
        let id = catalog
            .create_table(DEFAULT_DATABASE, def("t"), Timestamp::new(2))
            .unwrap();
        catalog.drop_table(id, Timestamp::new(3)).unwrap();

        assert_eq!(catalog.reclaim(Timestamp::new(3)), (0, 0));
        assert_eq!(catalog.reclaim(Timestamp::new(4)), (0, 1));
        assert!(catalog.table(id).is_none());
    }

    #[test]
    fn table_def_validation() {
        assert!(def("t").validate().is_ok());
        assert!(TableDef::new("", vec![ColumnDef::new("c", LogicalType::Integer)])
            .validate()
            .is_err());
        assert!(TableDef::new("t", vec![]).validate().is_err());
        assert!(TableDef::new(
            "t",
            vec![
                ColumnDef::new("c", LogicalType::Integer),
                ColumnDef::new("c", LogicalType::Double),
            ]
        )
        .validate()
        .is_err());
    }
}
