//! Row versions of historized tables.

use rusqlite::params_from_iter;
use rusqlite::types::Value;

use versiondb_core::naming::{quote_ident, quote_literal};
use versiondb_core::{BranchSource, FieldValue, Revision, RowId, RowLifecycle};

use crate::error::StorageError;
use crate::registry::VersionedTable;
use crate::schema::{BRANCH_COLUMN, CREATED_COLUMN, PARENT_COLUMN, REMOVED_COLUMN};
use crate::sqlite::Session;
use crate::values::{read_values, to_sql_all};
use crate::views::visible_select;

#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub lifecycle: RowLifecycle,
    pub values: Vec<FieldValue>,
}

fn user_columns(table: &VersionedTable) -> String {
    table
        .column_names()
        .iter()
        .map(|c| format!(", {}", quote_ident(c)))
        .collect()
}

fn revision_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Revision> {
    Revision::new(row.get(idx)?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Integer, Box::new(e)))
}

/// Every version of the table created on one of `branches`, lifecycle included.
pub fn load_rows(session: &Session, table: &VersionedTable, branches: &[&str]) -> Result<Vec<SourceRow>, StorageError> {
    if branches.is_empty() {
        return Ok(Vec::new());
    }
    let filter: Vec<String> = branches.iter().map(|b| quote_literal(b)).collect();
    let sql = format!(
        "SELECT {pk}, {BRANCH_COLUMN}, {CREATED_COLUMN}, {REMOVED_COLUMN}, {PARENT_COLUMN}{cols} FROM {rel} WHERE {BRANCH_COLUMN} IN ({filter}) ORDER BY {pk}",
        pk = quote_ident(&table.pkey),
        cols = user_columns(table),
        rel = table.qualified().quoted(),
        filter = filter.join(", "),
    );
    let count = table.columns.len();
    let mut stmt = session.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let removed: Option<i64> = row.get(3)?;
            Ok(SourceRow {
                lifecycle: RowLifecycle {
                    id: RowId::new(row.get(0)?),
                    branch: row.get(1)?,
                    created: revision_at(row, 2)?,
                    removed: match removed {
                        Some(_) => Some(revision_at(row, 3)?),
                        None => None,
                    },
                    parent: row.get::<_, Option<i64>>(4)?.map(RowId::new),
                },
                values: read_values(row, 5, count)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Identity and values of the rows visible through `sources`, ordered by identity.
pub fn visible_rows(
    session: &Session,
    table: &VersionedTable,
    sources: &[BranchSource],
) -> Result<Vec<(RowId, Vec<FieldValue>)>, StorageError> {
    let count = table.columns.len();
    let mut stmt = session.prepare(&visible_select(table, sources))?;
    let rows = stmt
        .query_map([], |row| Ok((RowId::new(row.get(0)?), read_values(row, 1, count)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn lifecycle(session: &Session, table: &VersionedTable, id: RowId) -> Result<RowLifecycle, StorageError> {
    let pk = quote_ident(&table.pkey);
    let sql = format!(
        "SELECT {pk}, {BRANCH_COLUMN}, {CREATED_COLUMN}, {REMOVED_COLUMN}, {PARENT_COLUMN} FROM {} WHERE {pk} = ?1",
        table.qualified().quoted()
    );
    session
        .query_optional(&sql, [id.get()], |row| {
            let removed: Option<i64> = row.get(3)?;
            Ok(RowLifecycle {
                id: RowId::new(row.get(0)?),
                branch: row.get(1)?,
                created: revision_at(row, 2)?,
                removed: match removed {
                    Some(_) => Some(revision_at(row, 3)?),
                    None => None,
                },
                parent: row.get::<_, Option<i64>>(4)?.map(RowId::new),
            })
        })?
        .ok_or_else(|| StorageError::NotFound(format!("row {id} of {}", table.qualified())))
}

/// Identity for the next version, above every existing one.
pub fn next_row_id(session: &Session, table: &VersionedTable) -> Result<RowId, StorageError> {
    let sql = format!(
        "SELECT COALESCE(MAX({}), 0) + 1 FROM {}",
        quote_ident(&table.pkey),
        table.qualified().quoted()
    );
    Ok(RowId::new(session.query_row(&sql, [], |row| row.get(0))?))
}

pub struct NewVersion<'a> {
    pub id: RowId,
    pub values: &'a [FieldValue],
    pub branch: &'a str,
    pub created: Revision,
    pub removed: Option<Revision>,
    pub parent: Option<RowId>,
}

pub fn insert_version(session: &Session, table: &VersionedTable, version: &NewVersion<'_>) -> Result<(), StorageError> {
    let columns = table.columns.len();
    let placeholders: Vec<String> = (1..=columns + 5).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}, {BRANCH_COLUMN}, {CREATED_COLUMN}, {REMOVED_COLUMN}, {PARENT_COLUMN}{}) VALUES ({})",
        table.qualified().quoted(),
        quote_ident(&table.pkey),
        user_columns(table),
        placeholders.join(", "),
    );

    let mut params: Vec<Value> = vec![
        Value::Integer(version.id.get()),
        Value::Text(version.branch.to_string()),
        Value::Integer(version.created.get()),
        version.removed.map_or(Value::Null, |r| Value::Integer(r.get())),
        version.parent.map_or(Value::Null, |p| Value::Integer(p.get())),
    ];
    params.extend(to_sql_all(version.values));
    session.execute(&sql, params_from_iter(params))?;
    Ok(())
}

/// Closes a live version at `revision`. Returns false when it was not live.
pub fn mark_removed(session: &Session, table: &VersionedTable, id: RowId, revision: Revision) -> Result<bool, StorageError> {
    let pk = quote_ident(&table.pkey);
    let sql = format!(
        "UPDATE {} SET {REMOVED_COLUMN} = ?1 WHERE {pk} = ?2 AND {REMOVED_COLUMN} IS NULL",
        table.qualified().quoted()
    );
    Ok(session.execute(&sql, [revision.get(), id.get()])? == 1)
}
