use versiondb_core::naming::{quote_ident, quote_literal, QualifiedName, TRUNK};

use crate::error::StorageError;
use crate::schema::{BRANCH_COLUMN, CREATED_COLUMN, PARENT_COLUMN, REMOVED_COLUMN};
use crate::sqlite::Session;

/// Adds the lifecycle columns to a plain table. Existing rows become live
/// trunk rows created at revision 0.
pub fn add_lifecycle_columns(session: &Session, table: &QualifiedName) -> Result<(), StorageError> {
    let relation = table.quoted();
    let parent_idx = quote_ident(&format!("{}_{PARENT_COLUMN}", table.relation()));
    let branch_idx = quote_ident(&format!("{}_{BRANCH_COLUMN}", table.relation()));
    let trunk = quote_literal(TRUNK);

    session.exec_batch(&format!(
        "
        ALTER TABLE {relation} ADD COLUMN {BRANCH_COLUMN} TEXT NOT NULL DEFAULT {trunk};
        ALTER TABLE {relation} ADD COLUMN {CREATED_COLUMN} INTEGER NOT NULL DEFAULT 0;
        ALTER TABLE {relation} ADD COLUMN {REMOVED_COLUMN} INTEGER;
        ALTER TABLE {relation} ADD COLUMN {PARENT_COLUMN} INTEGER;
        CREATE INDEX {parent_idx} ON {relation} ({PARENT_COLUMN});
        CREATE INDEX {branch_idx} ON {relation} ({BRANCH_COLUMN}, {CREATED_COLUMN});
        "
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_rows_become_live_trunk_rows() -> Result<(), Box<dyn std::error::Error>> {
        let session = Session::open_in_memory()?;
        session.exec_batch(
            "
            CREATE TABLE \"parcels.lots\" (id INTEGER PRIMARY KEY, name TEXT);
            INSERT INTO \"parcels.lots\" (name) VALUES ('a'), ('b');
            ",
        )?;
        add_lifecycle_columns(&session, &QualifiedName::new("parcels", "lots"))?;

        let (branch, created, removed): (String, i64, Option<i64>) = session.query_row(
            "SELECT versioning_branch, versioning_created, versioning_removed FROM \"parcels.lots\" WHERE id = 2",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        assert_eq!(branch, TRUNK);
        assert_eq!(created, 0);
        assert_eq!(removed, None);
        Ok(())
    }
}
