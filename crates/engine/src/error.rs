use thiserror::Error;
use versiondb_core::CoreError;
use versiondb_storage::StorageError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("schema {0} is already versioned")]
    AlreadyVersioned(String),

    #[error("schema {0} is not versioned")]
    NotVersioned(String),

    #[error("schema {0} has no tables")]
    UnknownSchema(String),

    #[error("table {0} is not versioned")]
    UnknownTable(String),

    #[error("table {0} has no single INTEGER primary key")]
    MissingPrimaryKey(String),

    #[error("invalid branch name {0:?}: must be non-empty and contain no underscore or space")]
    InvalidBranchName(String),

    #[error("branch {0} already exists")]
    DuplicateBranch(String),

    #[error("branch {0} doesn't exist")]
    UnknownBranch(String),

    #[error("revision {revision} doesn't exist on branch {branch}")]
    UnknownRevision { branch: String, revision: i64 },

    #[error("source tables span several databases, schemas or branches: {0}")]
    HeterogeneousSource(String),

    #[error("no source tables given")]
    NoSourceTables,

    #[error("a working copy already exists at {0}")]
    WorkingCopyExists(String),

    #[error("no working copy at {0}")]
    UnknownWorkingCopy(String),

    #[error("working copy is {late_by} revision(s) behind its branch head, update first")]
    StaleWorkingCopy { late_by: u64 },

    #[error("unresolved conflicts in {}", .tables.join(", "))]
    UnresolvedConflicts { tables: Vec<String> },

    #[error("row {id} of {table} was closed outside a commit")]
    VersionClosed { table: String, id: i64 },

    #[error("commit message is empty")]
    NoCommitMessage,

    #[error("conflict {conflict_id} not found in {table}")]
    ConflictNotFound { table: String, conflict_id: i64 },

    #[error("column {column} not found in {table}")]
    UnknownColumn { table: String, column: String },

    #[error("row {fid} not found in {table}")]
    RowNotFound { table: String, fid: i64 },
}
