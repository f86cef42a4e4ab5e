use serde::{Deserialize, Serialize};
use tracing::info;

use versiondb_core::{FieldValue, LocalState, Revision, RowId};
use versiondb_storage::rows::{self, NewVersion};
use versiondb_storage::{registry, working_copy, Session, VersionedTable, WorkingCopyStore};

use crate::checkout::{late_by, load_state, pinned_table, settle, WorkingCopy};
use crate::error::EngineError;
use crate::VersioningEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOutcome {
    /// The working copy had no local edits; no revision was allocated.
    NothingToCommit,
    Committed {
        revision: Revision,
        inserted: usize,
        updated: usize,
        deleted: usize,
    },
}

impl CommitOutcome {
    pub fn revision(&self) -> Option<Revision> {
        match self {
            Self::NothingToCommit => None,
            Self::Committed { revision, .. } => Some(*revision),
        }
    }

    /// Number of rows written; 0 means nothing was committed.
    pub fn changed_rows(&self) -> usize {
        match self {
            Self::NothingToCommit => 0,
            Self::Committed {
                inserted,
                updated,
                deleted,
                ..
            } => inserted + updated + deleted,
        }
    }
}

fn version<'a>(
    id: i64,
    values: &'a [FieldValue],
    branch: &'a str,
    created: Revision,
    removed: Option<Revision>,
    parent: Option<RowId>,
) -> NewVersion<'a> {
    NewVersion {
        id: RowId::new(id),
        values,
        branch,
        created,
        removed,
        parent,
    }
}

/// Closes a version of the committing branch, which must still be live.
fn close_version(session: &Session, table: &VersionedTable, id: RowId, revision: Revision) -> Result<(), EngineError> {
    if !rows::mark_removed(session, table, id, revision)? {
        return Err(EngineError::VersionClosed {
            table: table.name.clone(),
            id: id.get(),
        });
    }
    Ok(())
}

impl VersioningEngine {
    /// Writes the local edits of an up-to-date, conflict-free working copy as
    /// a new revision of its branch, then rebases the working copy onto it.
    /// Revision allocation, row versions and the registry entry share one
    /// transaction.
    pub fn commit<S: WorkingCopyStore>(&self, wc: &WorkingCopy<S>, message: &str) -> Result<CommitOutcome, EngineError> {
        if message.trim().is_empty() {
            return Err(EngineError::NoCommitMessage);
        }
        let author = self.author();
        let store = wc.store();

        let outcome = self.session.with_transaction(|s| -> Result<CommitOutcome, EngineError> {
            let state = load_state(s, store)?;
            if !state.conflicted.is_empty() {
                return Err(EngineError::UnresolvedConflicts { tables: state.conflicted });
            }
            settle(s, store, &state)?;
            let info = state.info;

            let graph = registry::branch_graph(s, &info.schema)?;
            let late = late_by(s, &graph, &info)?;
            if late > 0 {
                return Err(EngineError::StaleWorkingCopy { late_by: late });
            }

            let mut edits = Vec::with_capacity(info.tables.len());
            for name in &info.tables {
                let table = pinned_table(s, &info, name)?;
                let rows = working_copy::edited_rows(s, store, &table)?;
                if !rows.is_empty() {
                    edits.push((table, rows));
                }
            }
            if edits.is_empty() {
                return Ok(CommitOutcome::NothingToCommit);
            }

            let revision = registry::next_revision(s, &info.schema)?;
            registry::insert_revision(s, &info.schema, revision, &info.branch, message, Some(&author))?;

            let (mut inserted, mut updated, mut deleted) = (0, 0, 0);
            for (table, rows_to_commit) in &edits {
                let mut next_id = rows::next_row_id(s, table)?.get();
                for row in rows_to_commit {
                    match (row.state, row.origin) {
                        (LocalState::Base, _) => {}
                        (LocalState::Added, _) | (LocalState::Modified, None) => {
                            rows::insert_version(s, table, &version(next_id, &row.values, &info.branch, revision, None, None))?;
                            working_copy::rebase_row(s, store, table, row.fid, RowId::new(next_id))?;
                            next_id += 1;
                            inserted += 1;
                        }
                        (LocalState::Modified, Some(origin)) => {
                            let lifecycle = rows::lifecycle(s, table, origin)?;
                            if lifecycle.branch == info.branch {
                                close_version(s, table, origin, revision)?;
                            }
                            rows::insert_version(s, table, &version(next_id, &row.values, &info.branch, revision, None, Some(origin)))?;
                            working_copy::rebase_row(s, store, table, row.fid, RowId::new(next_id))?;
                            next_id += 1;
                            updated += 1;
                        }
                        (LocalState::Deleted, Some(origin)) => {
                            let lifecycle = rows::lifecycle(s, table, origin)?;
                            if lifecycle.branch == info.branch {
                                close_version(s, table, origin, revision)?;
                            } else {
                                // Rows inherited from a base branch are hidden by a
                                // tombstone version on this branch.
                                let tombstone = version(next_id, &row.values, &info.branch, revision, Some(revision), Some(origin));
                                rows::insert_version(s, table, &tombstone)?;
                                next_id += 1;
                            }
                            working_copy::remove_row(s, store, table, row.fid)?;
                            deleted += 1;
                        }
                        (LocalState::Deleted, None) => {
                            working_copy::remove_row(s, store, table, row.fid)?;
                        }
                    }
                }
            }

            working_copy::set_revision(s, store, revision)?;
            Ok(CommitOutcome::Committed {
                revision,
                inserted,
                updated,
                deleted,
            })
        })?;

        match outcome {
            CommitOutcome::Committed {
                revision,
                inserted,
                updated,
                deleted,
            } => info!(%revision, inserted, updated, deleted, author = %author, "committed working copy"),
            CommitOutcome::NothingToCommit => info!("nothing to commit"),
        }
        Ok(outcome)
    }
}
