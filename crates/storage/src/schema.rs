use rusqlite::Connection;

use versiondb_core::naming::{quote_ident, QualifiedName};

use crate::error::StorageError;

pub const BRANCH_COLUMN: &str = "versioning_branch";
pub const CREATED_COLUMN: &str = "versioning_created";
pub const REMOVED_COLUMN: &str = "versioning_removed";
pub const PARENT_COLUMN: &str = "versioning_parent";

pub const LIFECYCLE_COLUMNS: [&str; 4] = [BRANCH_COLUMN, CREATED_COLUMN, REMOVED_COLUMN, PARENT_COLUMN];

pub const REVISIONS_TABLE: &str = "revisions";
pub const BRANCHES_TABLE: &str = "branches";
pub const VERSIONED_TABLES_TABLE: &str = "versioned_tables";

pub const REGISTRY_TABLES: [&str; 3] = [REVISIONS_TABLE, BRANCHES_TABLE, VERSIONED_TABLES_TABLE];

pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

/// ISO-8601 UTC timestamp with milliseconds, evaluated by SQLite.
pub const NOW_SQL: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

pub fn registry_table(schema: &str, name: &str) -> QualifiedName {
    QualifiedName::new(schema, name)
}

/// Journal mode of every file the session writes. A transaction spanning
/// attached files is only atomic under a rollback journal; WAL commits each
/// file on its own.
pub const JOURNAL_MODE: &str = "DELETE";

pub fn init_connection(conn: &Connection, busy_timeout_ms: u32, file_backed: bool) -> Result<(), StorageError> {
    if file_backed {
        conn.execute_batch(&format!("PRAGMA journal_mode = {JOURNAL_MODE};"))?;
    }
    conn.execute_batch(&format!(
        "
        PRAGMA synchronous = FULL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = {busy_timeout_ms};
    "
    ))?;
    Ok(())
}

/// DDL for the revision, branch and table registries of `schema`.
pub fn registry_sql(schema: &str) -> String {
    let revisions = registry_table(schema, REVISIONS_TABLE).quoted();
    let branches = registry_table(schema, BRANCHES_TABLE).quoted();
    let tables = registry_table(schema, VERSIONED_TABLES_TABLE).quoted();
    let revisions_branch_idx = quote_ident(&format!("{schema}.revisions_branch"));

    format!(
        "
CREATE TABLE {revisions} (
    rev INTEGER PRIMARY KEY CHECK (rev >= 0),
    commit_msg TEXT,
    branch TEXT NOT NULL DEFAULT 'trunk',
    date TEXT NOT NULL DEFAULT ({NOW_SQL}),
    author TEXT
);
CREATE INDEX {revisions_branch_idx} ON {revisions} (branch, rev);

CREATE TABLE {branches} (
    name TEXT PRIMARY KEY,
    base_branch TEXT REFERENCES {branches} (name),
    base_rev INTEGER CHECK (base_rev IS NULL OR base_rev >= 0),
    created_rev INTEGER NOT NULL,
    commit_msg TEXT,
    date TEXT NOT NULL DEFAULT ({NOW_SQL}),
    author TEXT,
    CHECK ((base_branch IS NULL) = (base_rev IS NULL))
);

CREATE TABLE {tables} (
    table_name TEXT PRIMARY KEY,
    pkey TEXT NOT NULL,
    registered_at TEXT NOT NULL DEFAULT ({NOW_SQL})
);
"
    )
}
