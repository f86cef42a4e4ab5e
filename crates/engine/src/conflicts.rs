//! Listing and resolving the conflicts left by `update`.

use tracing::info;

use versiondb_core::{RowId, Side};
use versiondb_storage::working_copy;
use versiondb_storage::{ConflictRecord, WorkingCopyStore};

use crate::checkout::{load_state, pinned_table, settle, WorkingCopy};
use crate::error::EngineError;
use crate::VersioningEngine;

impl VersioningEngine {
    /// Tables of the working copy that still hold conflict records.
    pub fn unresolved_conflicts<S: WorkingCopyStore>(&self, wc: &WorkingCopy<S>) -> Result<Vec<String>, EngineError> {
        Ok(load_state(&self.session, wc.store())?.conflicted)
    }

    pub fn conflicts<S: WorkingCopyStore>(&self, wc: &WorkingCopy<S>, table: &str) -> Result<Vec<ConflictRecord>, EngineError> {
        let info = load_state(&self.session, wc.store())?.info;
        let versioned = pinned_table(&self.session, &info, table)?;
        Ok(working_copy::conflicts(&self.session, wc.store(), &versioned)?)
    }

    /// Resolves one conflict by keeping `keep` and discarding the other side.
    /// Once the last conflict of the working copy is gone its pin moves to
    /// the revision of the update that produced them.
    pub fn resolve_conflict<S: WorkingCopyStore>(
        &self,
        wc: &WorkingCopy<S>,
        table: &str,
        conflict_id: RowId,
        keep: Side,
    ) -> Result<(), EngineError> {
        let store = wc.store();
        self.session.with_transaction(|s| -> Result<(), EngineError> {
            let info = load_state(s, store)?.info;
            pinned_table(s, &info, table)?;
            if !working_copy::delete_conflict_side(s, store, table, conflict_id, keep.other())? {
                return Err(EngineError::ConflictNotFound {
                    table: table.to_string(),
                    conflict_id: conflict_id.get(),
                });
            }
            settle(s, store, &load_state(s, store)?)
        })?;
        info!(table, %conflict_id, keep = keep.as_str(), "resolved conflict");
        Ok(())
    }
}
