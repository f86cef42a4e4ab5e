//! Revision, branch and versioned-table registries of a historized schema.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use versiondb_core::naming::{QualifiedName, TRUNK};
use versiondb_core::{BranchBase, BranchGraph, Revision};

use crate::catalog::{table_columns, ColumnInfo};
use crate::error::StorageError;
use crate::schema::{registry_sql, registry_table, BRANCHES_TABLE, REVISIONS_TABLE, VERSIONED_TABLES_TABLE};
use crate::sqlite::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub revision: Revision,
    pub branch: String,
    pub commit_msg: Option<String>,
    pub date: String,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub name: String,
    pub base: Option<BranchBase>,
    /// Highest revision of the schema when the branch was created.
    pub created_rev: Revision,
    pub commit_msg: Option<String>,
    pub date: String,
    pub author: Option<String>,
}

/// A historized table: its identity column and the user columns carried by
/// views and working copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedTable {
    pub schema: String,
    pub name: String,
    pub pkey: String,
    pub columns: Vec<ColumnInfo>,
}

impl VersionedTable {
    pub fn qualified(&self) -> QualifiedName {
        QualifiedName::new(self.schema.clone(), self.name.clone())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

fn revision_from_sql(value: i64) -> rusqlite::Result<Revision> {
    Revision::new(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Integer, Box::new(e)))
}

pub fn is_versioned(session: &Session, schema: &str) -> Result<bool, StorageError> {
    session.relation_exists("main", &registry_table(schema, REVISIONS_TABLE).relation())
}

pub fn create_registry(session: &Session, schema: &str) -> Result<(), StorageError> {
    session.exec_batch(&registry_sql(schema))
}

// ============================================================================
// Revisions
// ============================================================================

pub fn insert_revision(
    session: &Session,
    schema: &str,
    revision: Revision,
    branch: &str,
    commit_msg: &str,
    author: Option<&str>,
) -> Result<(), StorageError> {
    let sql = format!(
        "INSERT INTO {} (rev, commit_msg, branch, author) VALUES (?1, ?2, ?3, ?4)",
        registry_table(schema, REVISIONS_TABLE).quoted()
    );
    session.execute(&sql, params![revision.get(), commit_msg, branch, author])?;
    Ok(())
}

/// Highest revision allocated in the schema, shared by all branches.
pub fn max_revision(session: &Session, schema: &str) -> Result<Revision, StorageError> {
    let sql = format!("SELECT MAX(rev) FROM {}", registry_table(schema, REVISIONS_TABLE).quoted());
    let max: Option<i64> = session.query_row(&sql, [], |row| row.get(0))?;
    Ok(Revision::new(max.unwrap_or(0))?)
}

pub fn next_revision(session: &Session, schema: &str) -> Result<Revision, StorageError> {
    Ok(max_revision(session, schema)?.next())
}

pub fn revisions(session: &Session, schema: &str) -> Result<Vec<RevisionRecord>, StorageError> {
    let sql = format!(
        "SELECT rev, branch, commit_msg, date, author FROM {} ORDER BY rev",
        registry_table(schema, REVISIONS_TABLE).quoted()
    );
    let mut stmt = session.prepare(&sql)?;
    let records = stmt
        .query_map([], |row| {
            Ok(RevisionRecord {
                revision: revision_from_sql(row.get(0)?)?,
                branch: row.get(1)?,
                commit_msg: row.get(2)?,
                date: row.get(3)?,
                author: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Highest revision committed on `branch`, or the revision it was forked at
/// when it has no commits of its own.
pub fn current_revision(session: &Session, schema: &str, branch: &str) -> Result<Revision, StorageError> {
    let sql = format!(
        "SELECT MAX(rev) FROM {} WHERE branch = ?1",
        registry_table(schema, REVISIONS_TABLE).quoted()
    );
    let own: Option<i64> = session.query_row(&sql, [branch], |row| row.get(0))?;
    if let Some(rev) = own {
        return Ok(Revision::new(rev)?);
    }

    let record = self::branch(session, schema, branch)?
        .ok_or_else(|| StorageError::NotFound(format!("branch {branch}")))?;
    Ok(record.base.map(|base| base.revision).unwrap_or(Revision::ZERO))
}

// ============================================================================
// Branches
// ============================================================================

pub fn insert_branch(
    session: &Session,
    schema: &str,
    name: &str,
    base: Option<&BranchBase>,
    created_rev: Revision,
    commit_msg: &str,
    author: Option<&str>,
) -> Result<(), StorageError> {
    let sql = format!(
        "INSERT INTO {} (name, base_branch, base_rev, created_rev, commit_msg, author) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        registry_table(schema, BRANCHES_TABLE).quoted()
    );
    session.execute(
        &sql,
        params![
            name,
            base.map(|b| b.branch.as_str()),
            base.map(|b| b.revision.get()),
            created_rev.get(),
            commit_msg,
            author,
        ],
    )?;
    Ok(())
}

fn read_branch(row: &rusqlite::Row<'_>) -> rusqlite::Result<BranchRecord> {
    let base_branch: Option<String> = row.get(1)?;
    let base_rev: Option<i64> = row.get(2)?;
    let base = match (base_branch, base_rev) {
        (Some(branch), Some(rev)) => Some(BranchBase {
            branch,
            revision: revision_from_sql(rev)?,
        }),
        _ => None,
    };
    Ok(BranchRecord {
        name: row.get(0)?,
        base,
        created_rev: revision_from_sql(row.get(3)?)?,
        commit_msg: row.get(4)?,
        date: row.get(5)?,
        author: row.get(6)?,
    })
}

pub fn branches(session: &Session, schema: &str) -> Result<Vec<BranchRecord>, StorageError> {
    let sql = format!(
        "SELECT name, base_branch, base_rev, created_rev, commit_msg, date, author FROM {} ORDER BY created_rev, rowid",
        registry_table(schema, BRANCHES_TABLE).quoted()
    );
    let mut stmt = session.prepare(&sql)?;
    let records = stmt.query_map([], read_branch)?.collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn branch(session: &Session, schema: &str, name: &str) -> Result<Option<BranchRecord>, StorageError> {
    let sql = format!(
        "SELECT name, base_branch, base_rev, created_rev, commit_msg, date, author FROM {} WHERE name = ?1",
        registry_table(schema, BRANCHES_TABLE).quoted()
    );
    session.query_optional(&sql, [name], read_branch)
}

pub fn branch_graph(session: &Session, schema: &str) -> Result<BranchGraph, StorageError> {
    let mut graph = BranchGraph::new();
    for record in branches(session, schema)? {
        graph.insert(record.name, record.base);
    }
    if !graph.contains(TRUNK) {
        return Err(StorageError::InvalidData(format!("schema {schema} has no {TRUNK} branch")));
    }
    Ok(graph)
}

// ============================================================================
// Versioned tables
// ============================================================================

pub fn register_table(session: &Session, schema: &str, table: &str, pkey: &str) -> Result<(), StorageError> {
    let sql = format!(
        "INSERT INTO {} (table_name, pkey) VALUES (?1, ?2)",
        registry_table(schema, VERSIONED_TABLES_TABLE).quoted()
    );
    session.execute(&sql, [table, pkey])?;
    Ok(())
}

fn load_table(session: &Session, schema: &str, name: String, pkey: String) -> Result<VersionedTable, StorageError> {
    let relation = QualifiedName::new(schema, name.as_str()).relation();
    let columns = table_columns(session, "main", &relation)?
        .into_iter()
        .filter(|c| c.name != pkey && !c.is_lifecycle())
        .collect();
    Ok(VersionedTable {
        schema: schema.to_string(),
        name,
        pkey,
        columns,
    })
}

pub fn versioned_tables(session: &Session, schema: &str) -> Result<Vec<VersionedTable>, StorageError> {
    let sql = format!(
        "SELECT table_name, pkey FROM {} ORDER BY table_name",
        registry_table(schema, VERSIONED_TABLES_TABLE).quoted()
    );
    let mut stmt = session.prepare(&sql)?;
    let entries = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    entries
        .into_iter()
        .map(|(name, pkey)| load_table(session, schema, name, pkey))
        .collect()
}

pub fn versioned_table(session: &Session, schema: &str, name: &str) -> Result<Option<VersionedTable>, StorageError> {
    let sql = format!(
        "SELECT pkey FROM {} WHERE table_name = ?1",
        registry_table(schema, VERSIONED_TABLES_TABLE).quoted()
    );
    match session.query_optional(&sql, [name], |row| row.get::<_, String>(0))? {
        Some(pkey) => Ok(Some(load_table(session, schema, name.to_string(), pkey)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(n: i64) -> Revision {
        Revision::new(n).unwrap()
    }

    fn registry() -> Result<Session, StorageError> {
        let session = Session::open_in_memory()?;
        create_registry(&session, "parcels")?;
        insert_revision(&session, "parcels", Revision::ZERO, TRUNK, "initial commit", None)?;
        insert_branch(&session, "parcels", TRUNK, None, Revision::ZERO, "initial commit", None)?;
        Ok(session)
    }

    #[test]
    fn revisions_share_one_sequence() -> Result<(), Box<dyn std::error::Error>> {
        let session = registry()?;
        assert!(is_versioned(&session, "parcels")?);
        assert!(!is_versioned(&session, "roads")?);

        insert_revision(&session, "parcels", rev(1), TRUNK, "one", Some("bob"))?;
        let base = BranchBase { branch: TRUNK.into(), revision: rev(1) };
        insert_branch(&session, "parcels", "alt", Some(&base), rev(1), "fork", None)?;
        assert_eq!(current_revision(&session, "parcels", "alt")?, rev(1));

        insert_revision(&session, "parcels", next_revision(&session, "parcels")?, "alt", "two", None)?;
        insert_revision(&session, "parcels", next_revision(&session, "parcels")?, TRUNK, "three", None)?;

        let all = revisions(&session, "parcels")?;
        assert_eq!(all.iter().map(|r| r.revision.get()).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(all[1].author.as_deref(), Some("bob"));
        assert_eq!(current_revision(&session, "parcels", "alt")?, rev(2));
        assert_eq!(current_revision(&session, "parcels", TRUNK)?, rev(3));
        assert!(matches!(
            current_revision(&session, "parcels", "nope"),
            Err(StorageError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn branch_graph_reflects_registry() -> Result<(), Box<dyn std::error::Error>> {
        let session = registry()?;
        let base = BranchBase { branch: TRUNK.into(), revision: Revision::ZERO };
        insert_branch(&session, "parcels", "alt", Some(&base), Revision::ZERO, "fork", None)?;

        let graph = branch_graph(&session, "parcels")?;
        assert_eq!(graph.base("alt"), Some(&base));
        assert!(graph.base(TRUNK).is_none());

        let listed = branches(&session, "parcels")?;
        assert_eq!(listed.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(), vec![TRUNK, "alt"]);
        assert_eq!(branch(&session, "parcels", "alt")?.and_then(|b| b.commit_msg), Some("fork".into()));
        Ok(())
    }
}
