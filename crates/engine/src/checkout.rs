//! Working copies: checkout, reopening, pins, `late`, and local edits.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use versiondb_core::naming::{QualifiedName, SourceTable};
use versiondb_core::{BranchGraph, CoreError, FieldValue, LocalState, Revision, RevisionSpec};
use versiondb_storage::working_copy::{self, PIN_TABLE};
use versiondb_storage::{registry, rows, CheckoutPin, LocalRow, Session, VersionedTable, WorkingCopyStore};

use crate::error::EngineError;
use crate::{branch_chain, require_branch, require_table, require_versioned, resolve_revision, VersioningEngine};

/// Handle on a checked-out working copy. The pin lives in the store itself;
/// the handle only says where.
#[derive(Debug)]
pub struct WorkingCopy<S: WorkingCopyStore> {
    store: S,
}

impl<S: WorkingCopyStore> WorkingCopy<S> {
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingCopyInfo {
    pub database: String,
    pub schema: String,
    pub branch: String,
    /// Revision the working-copy rows reflect.
    pub revision: Revision,
    /// Target of an update still waiting on conflict resolution.
    pub pending: Option<Revision>,
    pub tables: Vec<String>,
}

pub(crate) struct WorkingCopyState {
    pub info: WorkingCopyInfo,
    /// Tables with conflict records.
    pub conflicted: Vec<String>,
    /// A pending revision whose conflicts are all resolved but not yet written as the pin.
    pub unsettled: bool,
}

pub(crate) fn load_state(session: &Session, store: &dyn WorkingCopyStore) -> Result<WorkingCopyState, EngineError> {
    let pins = working_copy::pins(session, store)?;
    let first = pins
        .first()
        .ok_or_else(|| EngineError::UnknownWorkingCopy(store.location()))?;

    let mut conflicted = Vec::new();
    for pin in &pins {
        if working_copy::conflict_count(session, store, &pin.table)? > 0 {
            conflicted.push(pin.table.clone());
        }
    }

    let (revision, pending, unsettled) = match (first.pending, conflicted.is_empty()) {
        (Some(target), true) => (target, None, true),
        (pending, _) => (first.revision, pending, false),
    };

    Ok(WorkingCopyState {
        info: WorkingCopyInfo {
            database: first.source_database.clone(),
            schema: first.schema.clone(),
            branch: first.branch.clone(),
            revision,
            pending,
            tables: pins.iter().map(|p| p.table.clone()).collect(),
        },
        conflicted,
        unsettled,
    })
}

/// Writes a pending revision as the pin once its conflicts are gone.
pub(crate) fn settle(session: &Session, store: &dyn WorkingCopyStore, state: &WorkingCopyState) -> Result<(), EngineError> {
    if state.unsettled {
        working_copy::set_revision(session, store, state.info.revision)?;
        info!(revision = %state.info.revision, "working copy pin advanced after conflict resolution");
    }
    Ok(())
}

/// Revisions visible from the working copy's branch that were committed after its pin.
pub(crate) fn late_by(session: &Session, graph: &BranchGraph, info: &WorkingCopyInfo) -> Result<u64, EngineError> {
    let chain = branch_chain(graph, &info.branch, None)?;
    let late = registry::revisions(session, &info.schema)?
        .iter()
        .filter(|r| r.revision > info.revision)
        .filter(|r| chain.iter().any(|source| source.admits(&r.branch, r.revision)))
        .count();
    Ok(late as u64)
}

pub(crate) fn pinned_table(
    session: &Session,
    info: &WorkingCopyInfo,
    table: &str,
) -> Result<VersionedTable, EngineError> {
    if !info.tables.iter().any(|t| t == table) {
        return Err(EngineError::UnknownTable(table.to_string()));
    }
    require_table(session, &info.schema, table)
}

impl VersioningEngine {
    // ========================================================================
    // Checkout
    // ========================================================================

    /// Snapshots the rows of `sources` visible at `revision` into `store`.
    /// All sources must come from the session's database, one schema and one
    /// branch. On failure the store is discarded.
    pub fn checkout<S: WorkingCopyStore>(
        &self,
        store: S,
        sources: &[SourceTable],
        revision: RevisionSpec,
    ) -> Result<WorkingCopy<S>, EngineError> {
        let first = sources.first().ok_or(EngineError::NoSourceTables)?;
        let session_db = self.session.database();
        for source in sources {
            let database = source.database.as_deref().unwrap_or(session_db);
            if database != session_db || source.schema != first.schema || source.branch != first.branch {
                let listed: Vec<String> = sources.iter().map(ToString::to_string).collect();
                return Err(EngineError::HeterogeneousSource(listed.join(", ")));
            }
        }
        let schema = first.schema.as_str();
        let branch = first.branch.as_str();

        require_versioned(&self.session, schema)?;
        require_branch(&self.session, schema, branch)?;
        let pinned = resolve_revision(&self.session, schema, branch, revision)?;

        let mut seen = BTreeSet::new();
        let mut tables = Vec::new();
        for source in sources {
            if seen.insert(source.table.as_str()) {
                tables.push(require_table(&self.session, schema, &source.table)?);
            }
        }

        if store.relation(PIN_TABLE) == QualifiedName::new(schema, PIN_TABLE).relation() {
            return Err(EngineError::Core(CoreError::InvalidName(format!(
                "working copy cannot share the name of schema {schema}"
            ))));
        }
        if store.is_occupied(&self.session)? {
            return Err(EngineError::WorkingCopyExists(store.location()));
        }
        store.attach(&self.session)?;

        let result = self.session.with_transaction(|s| -> Result<usize, EngineError> {
            let chain = branch_chain(&registry::branch_graph(s, schema)?, branch, Some(pinned))?;
            working_copy::create_pin_table(s, &store)?;

            let mut copied = 0;
            for table in &tables {
                working_copy::create_table(s, &store, table)?;
                for (id, values) in rows::visible_rows(s, table, &chain)? {
                    working_copy::insert_base_row(s, &store, table, id, &values)?;
                    copied += 1;
                }
                working_copy::insert_pin(
                    s,
                    &store,
                    &CheckoutPin {
                        table: table.name.clone(),
                        source_database: session_db.to_string(),
                        schema: schema.to_string(),
                        branch: branch.to_string(),
                        pkey: table.pkey.clone(),
                        revision: pinned,
                        pending: None,
                    },
                )?;
            }
            Ok(copied)
        });

        match result {
            Ok(copied) => {
                info!(
                    schema,
                    branch,
                    revision = %pinned,
                    tables = tables.len(),
                    rows = copied,
                    location = %store.location(),
                    "checked out working copy"
                );
                Ok(WorkingCopy { store })
            }
            Err(e) => {
                if let Err(discard) = store.discard(&self.session) {
                    warn!(error = %discard, location = %store.location(), "failed to discard partial working copy");
                }
                Err(e)
            }
        }
    }

    /// Reattaches a working copy created by an earlier checkout.
    pub fn open_working_copy<S: WorkingCopyStore>(&self, store: S) -> Result<WorkingCopy<S>, EngineError> {
        store.attach(&self.session)?;
        if !working_copy::is_initialized(&self.session, &store)? {
            store.detach(&self.session)?;
            return Err(EngineError::UnknownWorkingCopy(store.location()));
        }
        Ok(WorkingCopy { store })
    }

    /// Detaches the working copy from the session, keeping its content.
    pub fn close_working_copy<S: WorkingCopyStore>(&self, wc: WorkingCopy<S>) -> Result<S, EngineError> {
        wc.store.detach(&self.session)?;
        Ok(wc.store)
    }

    pub fn discard_working_copy<S: WorkingCopyStore>(&self, wc: WorkingCopy<S>) -> Result<(), EngineError> {
        wc.store.discard(&self.session)?;
        Ok(())
    }

    pub fn working_copy_info<S: WorkingCopyStore>(&self, wc: &WorkingCopy<S>) -> Result<WorkingCopyInfo, EngineError> {
        Ok(load_state(&self.session, &wc.store)?.info)
    }

    /// How many revisions the working copy is behind its branch head.
    pub fn late<S: WorkingCopyStore>(&self, wc: &WorkingCopy<S>) -> Result<u64, EngineError> {
        let info = load_state(&self.session, &wc.store)?.info;
        let graph = registry::branch_graph(&self.session, &info.schema)?;
        late_by(&self.session, &graph, &info)
    }

    /// Revision number the next commit of this working copy would get if
    /// nothing else is committed first.
    pub fn revision<S: WorkingCopyStore>(&self, wc: &WorkingCopy<S>) -> Result<Revision, EngineError> {
        let info = load_state(&self.session, &wc.store)?.info;
        Ok(registry::max_revision(&self.session, &info.schema)?.max(info.revision).next())
    }

    // ========================================================================
    // Local edits
    // ========================================================================

    /// Rows of a working-copy table as seen through its edit view.
    pub fn rows<S: WorkingCopyStore>(&self, wc: &WorkingCopy<S>, table: &str) -> Result<Vec<LocalRow>, EngineError> {
        let info = load_state(&self.session, &wc.store)?.info;
        let versioned = pinned_table(&self.session, &info, table)?;
        Ok(working_copy::local_rows(&self.session, &wc.store, &versioned)?
            .into_iter()
            .filter(|row| row.state != LocalState::Deleted)
            .collect())
    }

    /// Adds a row; columns not named are NULL. Returns its working-copy id.
    pub fn insert_row<S: WorkingCopyStore>(
        &self,
        wc: &WorkingCopy<S>,
        table: &str,
        values: &[(&str, FieldValue)],
    ) -> Result<i64, EngineError> {
        let info = load_state(&self.session, &wc.store)?.info;
        let versioned = pinned_table(&self.session, &info, table)?;
        let mut row = vec![FieldValue::Null; versioned.columns.len()];
        for (idx, value) in column_indexes(&versioned, values)? {
            row[idx] = value;
        }
        Ok(working_copy::insert_local(&self.session, &wc.store, &versioned, &row)?)
    }

    pub fn update_row<S: WorkingCopyStore>(
        &self,
        wc: &WorkingCopy<S>,
        table: &str,
        fid: i64,
        values: &[(&str, FieldValue)],
    ) -> Result<(), EngineError> {
        let info = load_state(&self.session, &wc.store)?.info;
        let versioned = pinned_table(&self.session, &info, table)?;
        let assignments = column_indexes(&versioned, values)?;
        require_local_row(&self.session, &wc.store, &versioned, fid)?;
        Ok(working_copy::update_local(&self.session, &wc.store, &versioned, fid, &assignments)?)
    }

    pub fn delete_row<S: WorkingCopyStore>(&self, wc: &WorkingCopy<S>, table: &str, fid: i64) -> Result<(), EngineError> {
        let info = load_state(&self.session, &wc.store)?.info;
        let versioned = pinned_table(&self.session, &info, table)?;
        require_local_row(&self.session, &wc.store, &versioned, fid)?;
        Ok(working_copy::delete_local(&self.session, &wc.store, &versioned, fid)?)
    }
}

fn column_indexes(table: &VersionedTable, values: &[(&str, FieldValue)]) -> Result<Vec<(usize, FieldValue)>, EngineError> {
    values
        .iter()
        .map(|(column, value)| {
            table
                .column_index(column)
                .map(|idx| (idx, value.clone()))
                .ok_or_else(|| EngineError::UnknownColumn {
                    table: table.name.clone(),
                    column: column.to_string(),
                })
        })
        .collect()
}

fn require_local_row(
    session: &Session,
    store: &dyn WorkingCopyStore,
    table: &VersionedTable,
    fid: i64,
) -> Result<LocalRow, EngineError> {
    working_copy::local_row(session, store, table, fid)?.ok_or_else(|| EngineError::RowNotFound {
        table: table.name.clone(),
        fid,
    })
}
