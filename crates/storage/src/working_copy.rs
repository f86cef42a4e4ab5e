//! Working-copy storage: the two store adapters, per-table DDL (edit view,
//! edit-marker triggers, conflict side table and its resolution trigger),
//! pins, local rows and conflict records.

use std::path::{Path, PathBuf};

use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::debug;

use versiondb_core::naming::{conflicts_table, edit_view, quote_ident, validate_schema_name};
use versiondb_core::{ConflictAction, CoreError, FieldValue, LocalState, Revision, RowId, Side, WorkingCopyId};

use crate::error::StorageError;
use crate::registry::VersionedTable;
use crate::schema::{JOURNAL_MODE, NOW_SQL};
use crate::sqlite::Session;
use crate::traits::{CheckoutPin, ConflictRecord, LocalRow, StoreKind, WorkingCopyStore};
use crate::values::{read_values, to_sql_all};

pub const PIN_TABLE: &str = "checkout_pin";
pub const FID_COLUMN: &str = "wc_fid";
pub const STATE_COLUMN: &str = "wc_state";

fn converted<T>(idx: usize, result: Result<T, CoreError>) -> rusqlite::Result<T> {
    result.map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

// ============================================================================
// Stores
// ============================================================================

/// A working copy in its own SQLite file, attached to the session under a
/// generated alias.
#[derive(Debug, Clone)]
pub struct DetachedStore {
    path: PathBuf,
    alias: String,
}

impl DetachedStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            alias: format!("wc_{}", WorkingCopyId::new().simple()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorkingCopyStore for DetachedStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Detached
    }

    fn database(&self) -> &str {
        &self.alias
    }

    fn relation(&self, name: &str) -> String {
        name.to_string()
    }

    fn attach(&self, session: &Session) -> Result<(), StorageError> {
        if session.is_attached(&self.alias)? {
            return Ok(());
        }
        let path = self.path.to_string_lossy();
        session.execute(&format!("ATTACH DATABASE ?1 AS {}", quote_ident(&self.alias)), [&*path])?;
        // A working copy left in WAL mode would split commits across the two files.
        session.query_row(
            &format!("PRAGMA {}.journal_mode = {JOURNAL_MODE}", quote_ident(&self.alias)),
            [],
            |row| row.get::<_, String>(0),
        )?;
        debug!(alias = %self.alias, path = %path, "attached working copy");
        Ok(())
    }

    fn detach(&self, session: &Session) -> Result<(), StorageError> {
        if session.is_attached(&self.alias)? {
            session.exec_batch(&format!("DETACH DATABASE {}", quote_ident(&self.alias)))?;
        }
        Ok(())
    }

    fn discard(&self, session: &Session) -> Result<(), StorageError> {
        self.detach(session)?;
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        for suffix in ["-journal", "-wal", "-shm"] {
            let side_file = PathBuf::from(format!("{}{suffix}", self.path.to_string_lossy()));
            if side_file.exists() {
                std::fs::remove_file(side_file)?;
            }
        }
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn is_occupied(&self, _session: &Session) -> Result<bool, StorageError> {
        Ok(self.path.exists())
    }
}

/// A working copy kept as `{schema}.{relation}` objects inside the
/// versioned database itself.
#[derive(Debug, Clone)]
pub struct LiveSchemaStore {
    schema: String,
}

impl LiveSchemaStore {
    pub fn new(schema: impl Into<String>) -> Result<Self, StorageError> {
        let schema = schema.into();
        validate_schema_name(&schema)?;
        Ok(Self { schema })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn objects(&self, session: &Session) -> Result<Vec<(String, String)>, StorageError> {
        let prefix = format!("{}.", self.schema);
        let mut stmt = session.prepare(
            "SELECT type, name FROM main.sqlite_master WHERE type IN ('table', 'view') ORDER BY type DESC, name",
        )?;
        let objects = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(objects.into_iter().filter(|(_, name)| name.starts_with(&prefix)).collect())
    }
}

impl WorkingCopyStore for LiveSchemaStore {
    fn kind(&self) -> StoreKind {
        StoreKind::LiveSchema
    }

    fn database(&self) -> &str {
        "main"
    }

    fn relation(&self, name: &str) -> String {
        format!("{}.{}", self.schema, name)
    }

    fn attach(&self, _session: &Session) -> Result<(), StorageError> {
        Ok(())
    }

    fn detach(&self, _session: &Session) -> Result<(), StorageError> {
        Ok(())
    }

    fn discard(&self, session: &Session) -> Result<(), StorageError> {
        // Views sort before tables so nothing is dropped under a dependent view.
        for (kind, name) in self.objects(session)? {
            let statement = if kind == "view" { "DROP VIEW IF EXISTS" } else { "DROP TABLE IF EXISTS" };
            session.exec_batch(&format!("{statement} main.{}", quote_ident(&name)))?;
        }
        Ok(())
    }

    fn location(&self) -> String {
        format!("schema {}", self.schema)
    }

    fn is_occupied(&self, session: &Session) -> Result<bool, StorageError> {
        Ok(!self.objects(session)?.is_empty())
    }
}

pub fn is_initialized(session: &Session, store: &dyn WorkingCopyStore) -> Result<bool, StorageError> {
    session.relation_exists(store.database(), &store.relation(PIN_TABLE))
}

// ============================================================================
// Pins
// ============================================================================

pub fn create_pin_table(session: &Session, store: &dyn WorkingCopyStore) -> Result<(), StorageError> {
    session.exec_batch(&format!(
        "
CREATE TABLE {} (
    table_name TEXT PRIMARY KEY,
    source_database TEXT NOT NULL,
    table_schema TEXT NOT NULL,
    branch TEXT NOT NULL,
    pkey TEXT NOT NULL,
    revision INTEGER NOT NULL,
    pending_revision INTEGER,
    checked_out_at TEXT NOT NULL DEFAULT ({NOW_SQL})
);
",
        store.qualified(PIN_TABLE)
    ))
}

pub fn insert_pin(session: &Session, store: &dyn WorkingCopyStore, pin: &CheckoutPin) -> Result<(), StorageError> {
    let sql = format!(
        "INSERT INTO {} (table_name, source_database, table_schema, branch, pkey, revision, pending_revision) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        store.qualified(PIN_TABLE)
    );
    session.execute(
        &sql,
        rusqlite::params![
            pin.table,
            pin.source_database,
            pin.schema,
            pin.branch,
            pin.pkey,
            pin.revision.get(),
            pin.pending.map(Revision::get),
        ],
    )?;
    Ok(())
}

pub fn pins(session: &Session, store: &dyn WorkingCopyStore) -> Result<Vec<CheckoutPin>, StorageError> {
    let sql = format!(
        "SELECT table_name, source_database, table_schema, branch, pkey, revision, pending_revision FROM {} ORDER BY table_name",
        store.qualified(PIN_TABLE)
    );
    let mut stmt = session.prepare(&sql)?;
    let pins = stmt
        .query_map([], |row| {
            let pending: Option<i64> = row.get(6)?;
            Ok(CheckoutPin {
                table: row.get(0)?,
                source_database: row.get(1)?,
                schema: row.get(2)?,
                branch: row.get(3)?,
                pkey: row.get(4)?,
                revision: converted(5, Revision::new(row.get(5)?))?,
                pending: match pending {
                    Some(rev) => Some(converted(6, Revision::new(rev))?),
                    None => None,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pins)
}

/// Moves every table of the working copy to `revision` and clears any pending target.
pub fn set_revision(session: &Session, store: &dyn WorkingCopyStore, revision: Revision) -> Result<(), StorageError> {
    let sql = format!(
        "UPDATE {} SET revision = ?1, pending_revision = NULL",
        store.qualified(PIN_TABLE)
    );
    session.execute(&sql, [revision.get()])?;
    Ok(())
}

pub fn set_pending(session: &Session, store: &dyn WorkingCopyStore, pending: Option<Revision>) -> Result<(), StorageError> {
    let sql = format!("UPDATE {} SET pending_revision = ?1", store.qualified(PIN_TABLE));
    session.execute(&sql, [pending.map(Revision::get)])?;
    Ok(())
}

// ============================================================================
// Table DDL
// ============================================================================

struct TableNames {
    table: String,
    view: String,
    conflicts: String,
    local_table: String,
    local_view: String,
    local_conflicts: String,
    pkey: String,
    columns: Vec<String>,
}

impl TableNames {
    fn new(store: &dyn WorkingCopyStore, table: &VersionedTable) -> Self {
        Self {
            table: store.qualified(&table.name),
            view: store.qualified(&edit_view(&table.name)),
            conflicts: store.qualified(&conflicts_table(&table.name)),
            local_table: store.local(&table.name),
            local_view: store.local(&edit_view(&table.name)),
            local_conflicts: store.local(&conflicts_table(&table.name)),
            pkey: quote_ident(&table.pkey),
            columns: table.column_names().into_iter().map(quote_ident).collect(),
        }
    }

    /// `", c1, c2"` or `""`.
    fn tail(&self, prefix: &str) -> String {
        self.columns.iter().map(|c| format!(", {prefix}{c}")).collect()
    }
}

/// Creates the working-copy table, its edit view with the triggers keeping the
/// edit markers, and the conflict side table with its resolution trigger.
pub fn create_table(session: &Session, store: &dyn WorkingCopyStore, table: &VersionedTable) -> Result<(), StorageError> {
    let n = TableNames::new(store, table);
    let defs: String = table.columns.iter().map(|c| format!(",\n    {}", c.definition())).collect();
    let trigger = |suffix: &str| store.qualified(&format!("{}_{suffix}", table.name));

    let insert_columns = if n.columns.is_empty() {
        STATE_COLUMN.to_string()
    } else {
        format!("{}, {STATE_COLUMN}", n.columns.join(", "))
    };
    let insert_values = if n.columns.is_empty() {
        "'added'".to_string()
    } else {
        let news: Vec<String> = n.columns.iter().map(|c| format!("NEW.{c}")).collect();
        format!("{}, 'added'", news.join(", "))
    };
    let update_assignments: String = n.columns.iter().map(|c| format!("{c} = NEW.{c}, ")).collect();

    let theirs = format!("FROM {} WHERE conflict_id = OLD.conflict_id AND origin = 'theirs'", n.local_conflicts);
    let mine = format!("FROM {} WHERE conflict_id = OLD.conflict_id AND origin = 'mine'", n.local_conflicts);
    let take_theirs: String = n
        .columns
        .iter()
        .map(|c| format!("{c} = (SELECT {c} {theirs}), "))
        .collect();

    session.exec_batch(&format!(
        "
CREATE TABLE {table} (
    {FID_COLUMN} INTEGER PRIMARY KEY,
    {pkey} INTEGER UNIQUE{defs},
    {STATE_COLUMN} TEXT NOT NULL DEFAULT 'base' CHECK ({STATE_COLUMN} IN ('base', 'added', 'modified', 'deleted'))
);

CREATE VIEW {view} AS
    SELECT {FID_COLUMN}, {pkey}{cols} FROM {local_table} WHERE {STATE_COLUMN} <> 'deleted';

CREATE TRIGGER {ins} INSTEAD OF INSERT ON {local_view}
BEGIN
    INSERT INTO {local_table} ({insert_columns}) VALUES ({insert_values});
END;

CREATE TRIGGER {upd} INSTEAD OF UPDATE ON {local_view}
BEGIN
    UPDATE {local_table}
    SET {update_assignments}{STATE_COLUMN} = CASE {STATE_COLUMN} WHEN 'base' THEN 'modified' ELSE {STATE_COLUMN} END
    WHERE {FID_COLUMN} = OLD.{FID_COLUMN};
END;

CREATE TRIGGER {del} INSTEAD OF DELETE ON {local_view}
BEGIN
    DELETE FROM {local_table} WHERE {FID_COLUMN} = OLD.{FID_COLUMN} AND {STATE_COLUMN} = 'added';
    UPDATE {local_table} SET {STATE_COLUMN} = 'deleted' WHERE {FID_COLUMN} = OLD.{FID_COLUMN};
END;

CREATE TABLE {conflicts} (
    cflt_fid INTEGER PRIMARY KEY,
    conflict_id INTEGER NOT NULL,
    origin TEXT NOT NULL CHECK (origin IN ('mine', 'theirs')),
    action TEXT NOT NULL CHECK (action IN ('modified', 'deleted')),
    source_id INTEGER{defs},
    UNIQUE (conflict_id, origin)
);

CREATE TRIGGER {resolve} AFTER DELETE ON {local_conflicts}
BEGIN
    UPDATE {local_table} SET {pkey} = OLD.source_id
    WHERE OLD.origin = 'theirs' AND OLD.action = 'modified'
      AND {FID_COLUMN} = (SELECT source_id {mine});

    UPDATE {local_table} SET {pkey} = NULL, {STATE_COLUMN} = 'added'
    WHERE OLD.origin = 'theirs' AND OLD.action = 'deleted'
      AND {FID_COLUMN} = (SELECT source_id {mine});

    UPDATE {local_table}
    SET {take_theirs}{pkey} = (SELECT source_id {theirs}), {STATE_COLUMN} = 'base'
    WHERE OLD.origin = 'mine' AND {FID_COLUMN} = OLD.source_id
      AND EXISTS (SELECT 1 {theirs} AND action = 'modified');

    DELETE FROM {local_table}
    WHERE OLD.origin = 'mine' AND {FID_COLUMN} = OLD.source_id
      AND EXISTS (SELECT 1 {theirs} AND action = 'deleted');

    DELETE FROM {local_conflicts} WHERE conflict_id = OLD.conflict_id;
END;
",
        table = n.table,
        pkey = n.pkey,
        view = n.view,
        cols = n.tail(""),
        local_table = n.local_table,
        local_view = n.local_view,
        conflicts = n.conflicts,
        local_conflicts = n.local_conflicts,
        ins = trigger("view_insert"),
        upd = trigger("view_update"),
        del = trigger("view_delete"),
        resolve = trigger("conflicts_resolve"),
    ))
}

// ============================================================================
// Rows
// ============================================================================

/// Adds an unedited row mirroring version `id`.
pub fn insert_base_row(
    session: &Session,
    store: &dyn WorkingCopyStore,
    table: &VersionedTable,
    id: RowId,
    values: &[FieldValue],
) -> Result<(), StorageError> {
    let n = TableNames::new(store, table);
    let placeholders: String = (0..values.len()).map(|i| format!(", ?{}", i + 2)).collect();
    let sql = format!(
        "INSERT INTO {} ({}{}, {STATE_COLUMN}) VALUES (?1{placeholders}, 'base')",
        n.table,
        n.pkey,
        n.tail(""),
    );
    let mut params = vec![Value::Integer(id.get())];
    params.extend(to_sql_all(values));
    session.execute(&sql, params_from_iter(params))?;
    Ok(())
}

fn read_local_rows(
    session: &Session,
    store: &dyn WorkingCopyStore,
    table: &VersionedTable,
    filter: &str,
    params: &[Value],
) -> Result<Vec<LocalRow>, StorageError> {
    let n = TableNames::new(store, table);
    let sql = format!(
        "SELECT {FID_COLUMN}, {}, {STATE_COLUMN}{} FROM {} {filter} ORDER BY {FID_COLUMN}",
        n.pkey,
        n.tail(""),
        n.table,
    );
    let count = table.columns.len();
    let mut stmt = session.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            let state: String = row.get(2)?;
            Ok(LocalRow {
                fid: row.get(0)?,
                origin: row.get::<_, Option<i64>>(1)?.map(RowId::new),
                state: converted(2, LocalState::parse(&state))?,
                values: read_values(row, 3, count)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every row of the working-copy table, locally deleted ones included.
pub fn local_rows(session: &Session, store: &dyn WorkingCopyStore, table: &VersionedTable) -> Result<Vec<LocalRow>, StorageError> {
    read_local_rows(session, store, table, "", &[])
}

pub fn edited_rows(session: &Session, store: &dyn WorkingCopyStore, table: &VersionedTable) -> Result<Vec<LocalRow>, StorageError> {
    read_local_rows(session, store, table, &format!("WHERE {STATE_COLUMN} <> 'base'"), &[])
}

/// A row visible through the edit view.
pub fn local_row(
    session: &Session,
    store: &dyn WorkingCopyStore,
    table: &VersionedTable,
    fid: i64,
) -> Result<Option<LocalRow>, StorageError> {
    let filter = format!("WHERE {FID_COLUMN} = ?1 AND {STATE_COLUMN} <> 'deleted'");
    Ok(read_local_rows(session, store, table, &filter, &[Value::Integer(fid)])?.into_iter().next())
}

/// Replaces content and origin of a row with version `id`; the row becomes unedited.
pub fn replace_with_version(
    session: &Session,
    store: &dyn WorkingCopyStore,
    table: &VersionedTable,
    fid: i64,
    id: RowId,
    values: &[FieldValue],
) -> Result<(), StorageError> {
    let n = TableNames::new(store, table);
    let assignments: String = n
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{c} = ?{}, ", i + 3))
        .collect();
    let sql = format!(
        "UPDATE {} SET {assignments}{} = ?2, {STATE_COLUMN} = 'base' WHERE {FID_COLUMN} = ?1",
        n.table, n.pkey
    );
    let mut params = vec![Value::Integer(fid), Value::Integer(id.get())];
    params.extend(to_sql_all(values));
    session.execute(&sql, params_from_iter(params))?;
    Ok(())
}

/// Points a row at version `id` without touching its content; the row becomes unedited.
pub fn rebase_row(
    session: &Session,
    store: &dyn WorkingCopyStore,
    table: &VersionedTable,
    fid: i64,
    id: RowId,
) -> Result<(), StorageError> {
    let n = TableNames::new(store, table);
    let sql = format!(
        "UPDATE {} SET {} = ?2, {STATE_COLUMN} = 'base' WHERE {FID_COLUMN} = ?1",
        n.table, n.pkey
    );
    session.execute(&sql, [fid, id.get()])?;
    Ok(())
}

pub fn remove_row(session: &Session, store: &dyn WorkingCopyStore, table: &VersionedTable, fid: i64) -> Result<(), StorageError> {
    let sql = format!("DELETE FROM {} WHERE {FID_COLUMN} = ?1", store.qualified(&table.name));
    session.execute(&sql, [fid])?;
    Ok(())
}

// ============================================================================
// Local edits through the edit view
// ============================================================================

/// Inserts a row through the edit view and returns its working-copy id.
pub fn insert_local(
    session: &Session,
    store: &dyn WorkingCopyStore,
    table: &VersionedTable,
    values: &[FieldValue],
) -> Result<i64, StorageError> {
    let n = TableNames::new(store, table);
    if n.columns.is_empty() {
        session.execute(&format!("INSERT INTO {} ({}) VALUES (NULL)", n.view, n.pkey), [])?;
    } else {
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            n.view,
            n.columns.join(", "),
            placeholders.join(", ")
        );
        session.execute(&sql, params_from_iter(to_sql_all(values)))?;
    }
    let fid: i64 = session.query_row(&format!("SELECT MAX({FID_COLUMN}) FROM {}", n.table), [], |row| row.get(0))?;
    Ok(fid)
}

/// Updates the given columns (by index) of a row through the edit view.
pub fn update_local(
    session: &Session,
    store: &dyn WorkingCopyStore,
    table: &VersionedTable,
    fid: i64,
    assignments: &[(usize, FieldValue)],
) -> Result<(), StorageError> {
    if assignments.is_empty() {
        return Ok(());
    }
    let n = TableNames::new(store, table);
    let mut sets = Vec::with_capacity(assignments.len());
    let mut params = vec![Value::Integer(fid)];
    for (i, (column, value)) in assignments.iter().enumerate() {
        let name = n
            .columns
            .get(*column)
            .ok_or_else(|| StorageError::InvalidData(format!("column index {column} of {}", table.name)))?;
        sets.push(format!("{name} = ?{}", i + 2));
        params.push(crate::values::to_sql(value));
    }
    let sql = format!("UPDATE {} SET {} WHERE {FID_COLUMN} = ?1", n.view, sets.join(", "));
    session.execute(&sql, params_from_iter(params))?;
    Ok(())
}

pub fn delete_local(session: &Session, store: &dyn WorkingCopyStore, table: &VersionedTable, fid: i64) -> Result<(), StorageError> {
    let sql = format!("DELETE FROM {} WHERE {FID_COLUMN} = ?1", store.qualified(&edit_view(&table.name)));
    session.execute(&sql, [fid])?;
    Ok(())
}

// ============================================================================
// Conflicts
// ============================================================================

pub fn insert_conflict(
    session: &Session,
    store: &dyn WorkingCopyStore,
    table: &VersionedTable,
    record: &ConflictRecord,
) -> Result<(), StorageError> {
    let n = TableNames::new(store, table);
    let placeholders: String = (0..record.values.len()).map(|i| format!(", ?{}", i + 5)).collect();
    let sql = format!(
        "INSERT INTO {} (conflict_id, origin, action, source_id{}) VALUES (?1, ?2, ?3, ?4{placeholders})",
        n.conflicts,
        n.tail(""),
    );
    let mut params = vec![
        Value::Integer(record.conflict_id.get()),
        Value::Text(record.origin.as_str().to_string()),
        Value::Text(record.action.as_str().to_string()),
        record.source_id.map_or(Value::Null, Value::Integer),
    ];
    params.extend(to_sql_all(&record.values));
    session.execute(&sql, params_from_iter(params))?;
    Ok(())
}

pub fn conflicts(
    session: &Session,
    store: &dyn WorkingCopyStore,
    table: &VersionedTable,
) -> Result<Vec<ConflictRecord>, StorageError> {
    let n = TableNames::new(store, table);
    let sql = format!(
        "SELECT cflt_fid, conflict_id, origin, action, source_id{} FROM {} ORDER BY conflict_id, origin",
        n.tail(""),
        n.conflicts,
    );
    let count = table.columns.len();
    let mut stmt = session.prepare(&sql)?;
    let records = stmt
        .query_map([], |row| {
            let origin: String = row.get(2)?;
            let action: String = row.get(3)?;
            Ok(ConflictRecord {
                cflt_fid: row.get(0)?,
                conflict_id: RowId::new(row.get(1)?),
                origin: converted(2, Side::parse(&origin))?,
                action: converted(3, ConflictAction::parse(&action))?,
                source_id: row.get(4)?,
                values: read_values(row, 5, count)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn conflict_count(session: &Session, store: &dyn WorkingCopyStore, table: &str) -> Result<i64, StorageError> {
    let sql = format!("SELECT COUNT(*) FROM {}", store.qualified(&conflicts_table(table)));
    session.query_row(&sql, [], |row| row.get(0))
}

/// Deletes one side of a conflict; the resolution trigger applies the other.
/// Returns false when no such conflict row exists.
pub fn delete_conflict_side(
    session: &Session,
    store: &dyn WorkingCopyStore,
    table: &str,
    conflict_id: RowId,
    side: Side,
) -> Result<bool, StorageError> {
    let sql = format!(
        "DELETE FROM {} WHERE conflict_id = ?1 AND origin = ?2",
        store.qualified(&conflicts_table(table))
    );
    Ok(session.execute(&sql, rusqlite::params![conflict_id.get(), side.as_str()])? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnInfo;

    fn lots() -> VersionedTable {
        VersionedTable {
            schema: "parcels".into(),
            name: "lots".into(),
            pkey: "id".into(),
            columns: ["name", "area"]
                .iter()
                .map(|name| ColumnInfo {
                    name: name.to_string(),
                    decl_type: String::new(),
                    not_null: false,
                    primary_key: false,
                })
                .collect(),
        }
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.into())
    }

    fn setup() -> Result<(Session, LiveSchemaStore, VersionedTable), Box<dyn std::error::Error>> {
        let session = Session::open_in_memory()?;
        let store = LiveSchemaStore::new("wc")?;
        let table = lots();
        create_pin_table(&session, &store)?;
        create_table(&session, &store, &table)?;
        insert_base_row(&session, &store, &table, RowId::new(1), &[text("a"), FieldValue::Float(1.0)])?;
        insert_base_row(&session, &store, &table, RowId::new(2), &[text("b"), FieldValue::Float(2.0)])?;
        Ok((session, store, table))
    }

    #[test]
    fn edit_view_triggers_maintain_markers() -> Result<(), Box<dyn std::error::Error>> {
        let (session, store, table) = setup()?;
        assert!(is_initialized(&session, &store)?);

        let added = insert_local(&session, &store, &table, &[text("c"), FieldValue::Null])?;
        session.execute("UPDATE \"wc.lots_view\" SET name = 'a2' WHERE id = 1", [])?;
        session.execute("DELETE FROM \"wc.lots_view\" WHERE id = 2", [])?;

        let rows = local_rows(&session, &store, &table)?;
        let states: Vec<LocalState> = rows.iter().map(|r| r.state).collect();
        assert_eq!(states, vec![LocalState::Modified, LocalState::Deleted, LocalState::Added]);
        assert_eq!(rows[0].values[0], text("a2"));
        assert_eq!(rows[2].fid, added);

        delete_local(&session, &store, &table, added)?;
        assert_eq!(local_rows(&session, &store, &table)?.len(), 2);
        assert!(local_row(&session, &store, &table, rows[1].fid)?.is_none());
        Ok(())
    }

    #[test]
    fn deleting_mine_takes_theirs() -> Result<(), Box<dyn std::error::Error>> {
        let (session, store, table) = setup()?;
        session.execute("UPDATE \"wc.lots_view\" SET name = 'mine' WHERE id = 1", [])?;
        let fid = local_rows(&session, &store, &table)?[0].fid;

        for (origin, source_id, name) in [(Side::Mine, Some(fid), "mine"), (Side::Theirs, Some(7), "theirs")] {
            insert_conflict(
                &session,
                &store,
                &table,
                &ConflictRecord {
                    cflt_fid: 0,
                    conflict_id: RowId::new(1),
                    origin,
                    action: ConflictAction::Modified,
                    source_id,
                    values: vec![text(name), FieldValue::Float(1.0)],
                },
            )?;
        }
        assert_eq!(conflicts(&session, &store, &table)?.len(), 2);

        assert!(delete_conflict_side(&session, &store, "lots", RowId::new(1), Side::Mine)?);
        assert_eq!(conflict_count(&session, &store, "lots")?, 0);

        let row = &local_rows(&session, &store, &table)?[0];
        assert_eq!(row.origin, Some(RowId::new(7)));
        assert_eq!(row.state, LocalState::Base);
        assert_eq!(row.values[0], text("theirs"));
        Ok(())
    }

    #[test]
    fn discard_removes_live_schema_objects() -> Result<(), Box<dyn std::error::Error>> {
        let (session, store, _) = setup()?;
        assert!(store.is_occupied(&session)?);
        store.discard(&session)?;
        assert!(!store.is_occupied(&session)?);
        Ok(())
    }

    #[test]
    fn detached_store_attaches_and_discards_its_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let session = Session::open_in_memory()?;
        let store = DetachedStore::new(dir.path().join("wc.sqlite"));
        assert!(!store.is_occupied(&session)?);

        store.attach(&session)?;
        store.attach(&session)?;
        assert!(session.is_attached(store.database())?);
        assert_eq!(session.journal_mode(store.database())?, "delete");
        create_pin_table(&session, &store)?;
        create_table(&session, &store, &lots())?;
        assert!(is_initialized(&session, &store)?);
        assert!(store.is_occupied(&session)?);

        store.detach(&session)?;
        assert!(!session.is_attached(store.database())?);
        store.attach(&session)?;
        assert!(is_initialized(&session, &store)?);

        store.discard(&session)?;
        assert!(!store.path().exists());
        assert!(!session.is_attached(store.database())?);
        Ok(())
    }
}
