//! Introspection of tables and columns through `sqlite_master` and `pragma_table_info`.

use serde::{Deserialize, Serialize};

use versiondb_core::naming::quote_ident;

use crate::error::StorageError;
use crate::schema::{LIFECYCLE_COLUMNS, REGISTRY_TABLES};
use crate::sqlite::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

impl ColumnInfo {
    pub fn is_lifecycle(&self) -> bool {
        LIFECYCLE_COLUMNS.contains(&self.name.as_str())
    }

    /// Column definition for a copy of this column, without constraints.
    pub fn definition(&self) -> String {
        if self.decl_type.is_empty() {
            quote_ident(&self.name)
        } else {
            format!("{} {}", quote_ident(&self.name), self.decl_type)
        }
    }
}

/// Bare names of the base tables of `schema`, registry tables excluded.
pub fn schema_tables(session: &Session, schema: &str) -> Result<Vec<String>, StorageError> {
    let prefix = format!("{schema}.");
    let mut stmt = session.prepare("SELECT name FROM main.sqlite_master WHERE type = 'table' ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(names
        .into_iter()
        .filter_map(|name| name.strip_prefix(&prefix).map(str::to_string))
        .filter(|table| !table.is_empty() && !REGISTRY_TABLES.contains(&table.as_str()))
        .collect())
}

pub fn table_columns(session: &Session, database: &str, relation: &str) -> Result<Vec<ColumnInfo>, StorageError> {
    let mut stmt =
        session.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1, ?2) ORDER BY cid")?;
    let columns = stmt
        .query_map([relation, database], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                not_null: row.get(2)?,
                primary_key: row.get::<_, i64>(3)? > 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Err(StorageError::NotFound(format!("table {database}.{relation}")));
    }
    Ok(columns)
}

/// The single INTEGER primary key column, if the table has exactly one.
pub fn integer_primary_key(columns: &[ColumnInfo]) -> Option<&ColumnInfo> {
    let mut keys = columns.iter().filter(|c| c.primary_key);
    match (keys.next(), keys.next()) {
        (Some(key), None) if key.decl_type.eq_ignore_ascii_case("INTEGER") => Some(key),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_schema_tables_and_keys() -> Result<(), Box<dyn std::error::Error>> {
        let session = Session::open_in_memory()?;
        session.exec_batch(
            "
            CREATE TABLE \"parcels.lots\" (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
            CREATE TABLE \"parcels.notes\" (body TEXT);
            CREATE TABLE \"parcels.revisions\" (rev INTEGER PRIMARY KEY);
            CREATE TABLE \"roads.segments\" (id INTEGER PRIMARY KEY);
            CREATE VIEW \"parcels.v\" AS SELECT 1;
            ",
        )?;

        assert_eq!(schema_tables(&session, "parcels")?, vec!["lots", "notes"]);

        let lots = table_columns(&session, "main", "parcels.lots")?;
        assert_eq!(lots.len(), 2);
        assert!(lots[1].not_null);
        assert_eq!(integer_primary_key(&lots).map(|c| c.name.as_str()), Some("id"));

        let notes = table_columns(&session, "main", "parcels.notes")?;
        assert!(integer_primary_key(&notes).is_none());

        assert!(matches!(
            table_columns(&session, "main", "parcels.nope"),
            Err(StorageError::NotFound(_))
        ));
        Ok(())
    }
}
