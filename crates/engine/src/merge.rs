//! `update`: three-way merge of upstream revisions into a working copy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use versiondb_core::{
    reconcile, visible_rows, BranchSource, ConflictAction, FieldValue, Lineage, LocalState, MergeAction, Revision,
    RowId, RowLifecycle, Side, UpstreamChange,
};
use versiondb_storage::rows::{self, SourceRow};
use versiondb_storage::working_copy;
use versiondb_storage::{registry, ConflictRecord, LocalRow, Session, StorageError, VersionedTable, WorkingCopyStore};

use crate::checkout::{late_by, load_state, pinned_table, settle, WorkingCopy};
use crate::error::EngineError;
use crate::{branch_chain, VersioningEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStatus {
    UpToDate,
    Merged,
    /// Non-conflicting changes were applied; the pin waits on the listed conflicts.
    Conflicted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMerge {
    pub table: String,
    /// Rows replaced by their upstream version.
    pub applied: usize,
    /// Upstream rows new to the working copy.
    pub inserted: usize,
    /// Rows deleted upstream and dropped locally.
    pub removed: usize,
    /// Rows edited identically on both sides.
    pub auto_resolved: usize,
    /// Identities of the rows now waiting in the conflict table.
    pub conflicts: Vec<RowId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub from: Revision,
    pub to: Revision,
    pub status: UpdateStatus,
    pub tables: Vec<TableMerge>,
}

impl UpdateReport {
    pub fn conflict_count(&self) -> usize {
        self.tables.iter().map(|t| t.conflicts.len()).sum()
    }
}

impl VersioningEngine {
    /// Brings the working copy up to its branch head. Fails while conflict
    /// records remain; otherwise applies upstream changes, keeps local ones,
    /// and records a conflict for every row changed incompatibly on both sides.
    pub fn update<S: WorkingCopyStore>(&self, wc: &WorkingCopy<S>) -> Result<UpdateReport, EngineError> {
        let store = wc.store();
        let report = self.session.with_transaction(|s| -> Result<UpdateReport, EngineError> {
            let state = load_state(s, store)?;
            if !state.conflicted.is_empty() {
                return Err(EngineError::UnresolvedConflicts { tables: state.conflicted });
            }
            settle(s, store, &state)?;
            let info = state.info;

            let graph = registry::branch_graph(s, &info.schema)?;
            if late_by(s, &graph, &info)? == 0 {
                return Ok(UpdateReport {
                    from: info.revision,
                    to: info.revision,
                    status: UpdateStatus::UpToDate,
                    tables: Vec::new(),
                });
            }

            let head = registry::current_revision(s, &info.schema, &info.branch)?;
            let base_chain = branch_chain(&graph, &info.branch, Some(info.revision))?;
            let head_chain = branch_chain(&graph, &info.branch, None)?;

            let mut tables = Vec::with_capacity(info.tables.len());
            for name in &info.tables {
                let table = pinned_table(s, &info, name)?;
                tables.push(merge_table(s, store, &table, &base_chain, &head_chain)?);
            }

            let conflicted = tables.iter().any(|t| !t.conflicts.is_empty());
            if conflicted {
                working_copy::set_pending(s, store, Some(head))?;
            } else {
                working_copy::set_revision(s, store, head)?;
            }

            Ok(UpdateReport {
                from: info.revision,
                to: head,
                status: if conflicted { UpdateStatus::Conflicted } else { UpdateStatus::Merged },
                tables,
            })
        })?;

        match report.status {
            UpdateStatus::Conflicted => warn!(
                from = %report.from,
                to = %report.to,
                conflicts = report.conflict_count(),
                "update stopped on conflicts"
            ),
            _ => info!(from = %report.from, to = %report.to, status = ?report.status, "updated working copy"),
        }
        Ok(report)
    }
}

fn values_of<'a>(
    values: &BTreeMap<RowId, &'a [FieldValue]>,
    table: &VersionedTable,
    id: RowId,
) -> Result<&'a [FieldValue], StorageError> {
    values
        .get(&id)
        .copied()
        .ok_or_else(|| StorageError::NotFound(format!("row {id} of {}", table.qualified())))
}

fn merge_table(
    session: &Session,
    store: &dyn WorkingCopyStore,
    table: &VersionedTable,
    base_chain: &[BranchSource],
    head_chain: &[BranchSource],
) -> Result<TableMerge, EngineError> {
    let branches: Vec<&str> = head_chain.iter().map(|s| s.branch.as_str()).collect();
    let source: Vec<SourceRow> = rows::load_rows(session, table, &branches)?;
    let lifecycles: Vec<RowLifecycle> = source.iter().map(|r| r.lifecycle.clone()).collect();
    let values: BTreeMap<RowId, &[FieldValue]> = source
        .iter()
        .map(|r| (r.lifecycle.id, r.values.as_slice()))
        .collect();

    let base_visible = visible_rows(base_chain, &lifecycles);
    let head_visible = visible_rows(head_chain, &lifecycles);
    let lineage = Lineage::new(&lifecycles);

    let local = working_copy::local_rows(session, store, table)?;
    let by_origin: BTreeMap<RowId, &LocalRow> = local
        .iter()
        .filter_map(|row| row.origin.map(|origin| (origin, row)))
        .collect();

    let mut merge = TableMerge {
        table: table.name.clone(),
        ..TableMerge::default()
    };

    for &base_id in &base_visible {
        let Some(row) = by_origin.get(&base_id) else {
            continue;
        };
        let change = lineage.upstream_change(base_id, &head_visible);
        let same_content = match change {
            UpstreamChange::Modified { theirs } if row.state == LocalState::Modified => {
                values_of(&values, table, theirs)? == row.values.as_slice()
            }
            _ => false,
        };

        match reconcile(change, row.state, same_content) {
            MergeAction::Keep => {}
            MergeAction::TakeTheirs(theirs) => {
                let content = values_of(&values, table, theirs)?;
                working_copy::replace_with_version(session, store, table, row.fid, theirs, content)?;
                merge.applied += 1;
            }
            MergeAction::DropLocal => {
                working_copy::remove_row(session, store, table, row.fid)?;
                merge.removed += 1;
            }
            MergeAction::AutoResolved(theirs) => {
                working_copy::rebase_row(session, store, table, row.fid, theirs)?;
                merge.auto_resolved += 1;
            }
            MergeAction::Conflict { mine, theirs } => {
                working_copy::insert_conflict(
                    session,
                    store,
                    table,
                    &ConflictRecord {
                        cflt_fid: 0,
                        conflict_id: base_id,
                        origin: Side::Mine,
                        action: mine,
                        source_id: Some(row.fid),
                        values: row.values.clone(),
                    },
                )?;
                // A deleted upstream row is shown with the content it had at the pin.
                let (action, content) = match theirs {
                    Some(id) => (ConflictAction::Modified, values_of(&values, table, id)?),
                    None => (ConflictAction::Deleted, values_of(&values, table, base_id)?),
                };
                working_copy::insert_conflict(
                    session,
                    store,
                    table,
                    &ConflictRecord {
                        cflt_fid: 0,
                        conflict_id: base_id,
                        origin: Side::Theirs,
                        action,
                        source_id: theirs.map(RowId::get),
                        values: content.to_vec(),
                    },
                )?;
                merge.conflicts.push(base_id);
            }
        }
    }

    for id in lineage.upstream_inserts(&base_visible, &head_visible) {
        if by_origin.contains_key(&id) {
            continue;
        }
        working_copy::insert_base_row(session, store, table, id, values_of(&values, table, id)?)?;
        merge.inserted += 1;
    }

    debug!(
        table = %table.qualified(),
        applied = merge.applied,
        inserted = merge.inserted,
        removed = merge.removed,
        auto_resolved = merge.auto_resolved,
        conflicts = merge.conflicts.len(),
        "merged table"
    );
    Ok(merge)
}
