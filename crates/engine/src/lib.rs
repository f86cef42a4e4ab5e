//! The versioning engine: historize a schema, manage branches and revisions,
//! materialize historical views, and run the checkout / update / commit cycle
//! of working copies.

pub mod checkout;
pub mod commit;
pub mod config;
pub mod conflicts;
pub mod error;
pub mod merge;

pub use checkout::{WorkingCopy, WorkingCopyInfo};
pub use commit::CommitOutcome;
pub use config::EngineConfig;
pub use error::EngineError;
pub use merge::{TableMerge, UpdateReport, UpdateStatus};

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use versiondb_core::naming::{validate_branch_name, validate_schema_name, QualifiedName, TRUNK};
use versiondb_core::{BranchBase, BranchGraph, BranchSource, CoreError, FieldValue, Revision, RevisionSpec, RowId};
use versiondb_storage::{
    catalog, historize, registry, rows, views, BranchRecord, ConnectionInfo, ConnectionProvider, CredentialResolver,
    EnvCredentials, RevisionRecord, Session, SqliteProvider, VersionedTable, ViewSet,
};

pub const INITIAL_COMMIT: &str = "initial commit";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorizeReport {
    pub schema: String,
    /// Every table that received lifecycle columns.
    pub tables: Vec<String>,
    /// Tables left alone for lack of an INTEGER primary key.
    pub skipped: Vec<String>,
    pub views: ViewSet,
}

/// One line of a schema's history: a commit, or the creation of a branch
/// listed at the schema revision it was created at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryEntry {
    Commit(RevisionRecord),
    BranchCreated(BranchRecord),
}

impl HistoryEntry {
    pub fn revision(&self) -> Revision {
        match self {
            Self::Commit(record) => record.revision,
            Self::BranchCreated(record) => record.created_rev,
        }
    }

    pub fn branch(&self) -> &str {
        match self {
            Self::Commit(record) => &record.branch,
            Self::BranchCreated(record) => &record.name,
        }
    }
}

pub struct VersioningEngine {
    session: Session,
    config: EngineConfig,
}

impl VersioningEngine {
    pub fn new(session: Session, config: EngineConfig) -> Self {
        Self { session, config }
    }

    pub fn open(
        info: ConnectionInfo,
        provider: &dyn ConnectionProvider,
        resolver: &dyn CredentialResolver,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let session = Session::open(info, provider, resolver)?;
        Ok(Self::new(session, config))
    }

    pub fn open_path(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let info = ConnectionInfo::new(path.as_ref().to_string_lossy().into_owned());
        let provider = SqliteProvider {
            busy_timeout_ms: config.busy_timeout_ms,
        };
        Self::open(info, &provider, &EnvCredentials, config)
    }

    pub fn open_in_memory(config: EngineConfig) -> Result<Self, EngineError> {
        let provider = SqliteProvider {
            busy_timeout_ms: config.busy_timeout_ms,
        };
        Self::open(ConnectionInfo::in_memory(), &provider, &EnvCredentials, config)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Author recorded on new revisions and branches.
    pub fn author(&self) -> String {
        self.config
            .author
            .clone()
            .or_else(|| self.session.user().map(str::to_string))
            .unwrap_or_else(|| self.config.default_commit_author.clone())
    }

    fn require_versioned(&self, schema: &str) -> Result<(), EngineError> {
        require_versioned(&self.session, schema)
    }

    // ========================================================================
    // Historizer
    // ========================================================================

    /// Turns every table of `schema` into a versioned table. This is
    /// schema-wide DDL: the report lists each table touched.
    pub fn historize(&self, schema: &str) -> Result<HistorizeReport, EngineError> {
        validate_schema_name(schema)?;
        if registry::is_versioned(&self.session, schema)? {
            return Err(EngineError::AlreadyVersioned(schema.to_string()));
        }
        let tables = catalog::schema_tables(&self.session, schema)?;
        if tables.is_empty() {
            return Err(EngineError::UnknownSchema(schema.to_string()));
        }
        let author = self.author();

        let report = self.session.with_transaction(|s| -> Result<HistorizeReport, EngineError> {
            registry::create_registry(s, schema)?;

            let mut historized = Vec::new();
            let mut skipped = Vec::new();
            for table in tables {
                let name = QualifiedName::new(schema, table.as_str());
                let columns = catalog::table_columns(s, "main", &name.relation())?;
                let Some(pkey) = catalog::integer_primary_key(&columns).map(|c| c.name.clone()) else {
                    if self.config.skip_tables_without_pk {
                        warn!(table = %name, "skipping table without INTEGER primary key");
                        skipped.push(table);
                        continue;
                    }
                    return Err(EngineError::MissingPrimaryKey(name.to_string()));
                };
                historize::add_lifecycle_columns(s, &name)?;
                registry::register_table(s, schema, &table, &pkey)?;
                historized.push(table);
            }

            registry::insert_revision(s, schema, Revision::ZERO, TRUNK, INITIAL_COMMIT, Some(&author))?;
            registry::insert_branch(s, schema, TRUNK, None, Revision::ZERO, INITIAL_COMMIT, Some(&author))?;

            let chain = branch_chain(&registry::branch_graph(s, schema)?, TRUNK, None)?;
            let versioned = registry::versioned_tables(s, schema)?;
            let views = views::materialize(s, schema, TRUNK, RevisionSpec::Head, &chain, &versioned)?;

            Ok(HistorizeReport {
                schema: schema.to_string(),
                tables: historized,
                skipped,
                views,
            })
        })?;

        info!(
            schema,
            tables = ?report.tables,
            skipped = report.skipped.len(),
            "historized schema"
        );
        Ok(report)
    }

    // ========================================================================
    // Revision store
    // ========================================================================

    pub fn create_branch(
        &self,
        schema: &str,
        name: &str,
        commit_msg: &str,
        base_branch: &str,
        base_revision: RevisionSpec,
    ) -> Result<BranchRecord, EngineError> {
        validate_branch_name(name).map_err(|_| EngineError::InvalidBranchName(name.to_string()))?;
        if commit_msg.trim().is_empty() {
            return Err(EngineError::NoCommitMessage);
        }
        self.require_versioned(schema)?;
        let author = self.author();

        let record = self.session.with_transaction(|s| -> Result<BranchRecord, EngineError> {
            if registry::branch(s, schema, name)?.is_some() {
                return Err(EngineError::DuplicateBranch(name.to_string()));
            }
            require_branch(s, schema, base_branch)?;
            let revision = resolve_revision(s, schema, base_branch, base_revision)?;
            let base = BranchBase {
                branch: base_branch.to_string(),
                revision,
            };
            let created_rev = registry::max_revision(s, schema)?;
            registry::insert_branch(s, schema, name, Some(&base), created_rev, commit_msg, Some(&author))?;

            let chain = branch_chain(&registry::branch_graph(s, schema)?, name, None)?;
            let versioned = registry::versioned_tables(s, schema)?;
            views::materialize(s, schema, name, RevisionSpec::Head, &chain, &versioned)?;

            registry::branch(s, schema, name)?.ok_or_else(|| EngineError::UnknownBranch(name.to_string()))
        })?;

        let base_rev = record.base.as_ref().map_or(Revision::ZERO, |b| b.revision);
        info!(schema, branch = name, base = base_branch, %base_rev, "created branch");
        Ok(record)
    }

    pub fn current_revision(&self, schema: &str, branch: &str) -> Result<Revision, EngineError> {
        self.require_versioned(schema)?;
        require_branch(&self.session, schema, branch)?;
        Ok(registry::current_revision(&self.session, schema, branch)?)
    }

    /// All revisions of the schema, every branch, in order.
    pub fn list_revisions(&self, schema: &str) -> Result<Vec<RevisionRecord>, EngineError> {
        self.require_versioned(schema)?;
        Ok(registry::revisions(&self.session, schema)?)
    }

    pub fn list_branches(&self, schema: &str) -> Result<Vec<BranchRecord>, EngineError> {
        self.require_versioned(schema)?;
        Ok(registry::branches(&self.session, schema)?)
    }

    /// Commits and branch creations interleaved in revision order. A branch
    /// created at revision N follows the commit of N.
    pub fn list_history(&self, schema: &str) -> Result<Vec<HistoryEntry>, EngineError> {
        self.require_versioned(schema)?;
        let mut history: Vec<HistoryEntry> = registry::revisions(&self.session, schema)?
            .into_iter()
            .map(HistoryEntry::Commit)
            .chain(
                registry::branches(&self.session, schema)?
                    .into_iter()
                    .map(HistoryEntry::BranchCreated),
            )
            .collect();
        history.sort_by_key(HistoryEntry::revision);
        Ok(history)
    }

    // ========================================================================
    // View materializer
    // ========================================================================

    /// Materializes `{schema}_{branch}_rev_{revision|head}.{table}` for every
    /// versioned table. Existing views are reused.
    pub fn build_view(&self, schema: &str, branch: &str, revision: RevisionSpec) -> Result<ViewSet, EngineError> {
        self.require_versioned(schema)?;

        let set = self.session.with_transaction(|s| -> Result<ViewSet, EngineError> {
            require_branch(s, schema, branch)?;
            if let RevisionSpec::At(rev) = revision {
                resolve_revision(s, schema, branch, RevisionSpec::At(rev))?;
            }
            let chain = branch_chain(&registry::branch_graph(s, schema)?, branch, revision.fixed())?;
            let versioned = registry::versioned_tables(s, schema)?;
            Ok(views::materialize(s, schema, branch, revision, &chain, &versioned)?)
        })?;

        info!(view_schema = %set.schema_name, status = ?set.status, "built views");
        Ok(set)
    }

    /// Identity and user columns of the rows of `table` visible at (`branch`, `revision`).
    pub fn rows_at(
        &self,
        schema: &str,
        branch: &str,
        revision: RevisionSpec,
        table: &str,
    ) -> Result<Vec<(RowId, Vec<FieldValue>)>, EngineError> {
        self.require_versioned(schema)?;
        require_branch(&self.session, schema, branch)?;
        let revision = resolve_revision(&self.session, schema, branch, revision)?;
        let versioned = require_table(&self.session, schema, table)?;
        let chain = branch_chain(&registry::branch_graph(&self.session, schema)?, branch, Some(revision))?;
        Ok(rows::visible_rows(&self.session, &versioned, &chain)?)
    }
}

pub(crate) fn require_versioned(session: &Session, schema: &str) -> Result<(), EngineError> {
    if !registry::is_versioned(session, schema)? {
        return Err(EngineError::NotVersioned(schema.to_string()));
    }
    Ok(())
}

pub(crate) fn require_branch(session: &Session, schema: &str, branch: &str) -> Result<BranchRecord, EngineError> {
    registry::branch(session, schema, branch)?.ok_or_else(|| EngineError::UnknownBranch(branch.to_string()))
}

pub(crate) fn require_table(session: &Session, schema: &str, table: &str) -> Result<VersionedTable, EngineError> {
    registry::versioned_table(session, schema, table)?
        .ok_or_else(|| EngineError::UnknownTable(QualifiedName::new(schema, table).to_string()))
}

/// `head` resolves to the branch's current revision; a fixed revision must
/// not lie beyond it.
pub(crate) fn resolve_revision(
    session: &Session,
    schema: &str,
    branch: &str,
    revision: RevisionSpec,
) -> Result<Revision, EngineError> {
    let current = registry::current_revision(session, schema, branch)?;
    match revision {
        RevisionSpec::Head => Ok(current),
        RevisionSpec::At(rev) if rev <= current => Ok(rev),
        RevisionSpec::At(rev) => Err(EngineError::UnknownRevision {
            branch: branch.to_string(),
            revision: rev.get(),
        }),
    }
}

pub(crate) fn branch_chain(graph: &BranchGraph, branch: &str, cutoff: Option<Revision>) -> Result<Vec<BranchSource>, EngineError> {
    graph.sources(branch, cutoff).map_err(|e| match e {
        CoreError::UnknownBranch(name) => EngineError::UnknownBranch(name),
        other => EngineError::Core(other),
    })
}
