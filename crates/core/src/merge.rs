//! Row lineage and the three-way reconciliation rule used by update.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::branch_graph::RowLifecycle;
use crate::error::CoreError;
use crate::ids::RowId;

/// Local edit marker of a working-copy row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalState {
    Base,
    Added,
    Modified,
    Deleted,
}

impl LocalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "base" => Ok(Self::Base),
            "added" => Ok(Self::Added),
            "modified" => Ok(Self::Modified),
            "deleted" => Ok(Self::Deleted),
            _ => Err(CoreError::InvalidData(format!("unknown local state: {s}"))),
        }
    }

    pub fn is_edited(&self) -> bool {
        !matches!(self, Self::Base)
    }
}

/// Which half of a conflict record a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Mine,
    Theirs,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mine => "mine",
            Self::Theirs => "theirs",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "mine" => Ok(Self::Mine),
            "theirs" => Ok(Self::Theirs),
            _ => Err(CoreError::InvalidData(format!("unknown conflict side: {s}"))),
        }
    }

    pub fn other(&self) -> Self {
        match self {
            Self::Mine => Self::Theirs,
            Self::Theirs => Self::Mine,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictAction {
    Modified,
    Deleted,
}

impl ConflictAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "modified" => Ok(Self::Modified),
            "deleted" => Ok(Self::Deleted),
            _ => Err(CoreError::InvalidData(format!("unknown conflict action: {s}"))),
        }
    }
}

/// What happened upstream to a row that was visible at the pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamChange {
    Unchanged,
    Modified { theirs: RowId },
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    /// Leave the working-copy row as it is.
    Keep,
    /// Replace the row with the upstream version.
    TakeTheirs(RowId),
    /// Remove the row from the working copy.
    DropLocal,
    /// Both sides reached the same content; rebase the local row onto `theirs`.
    AutoResolved(RowId),
    Conflict { mine: ConflictAction, theirs: Option<RowId> },
}

/// Three-way decision for one row identity. `same_content` compares the
/// local values with the upstream version and is ignored unless both sides
/// modified the row.
pub fn reconcile(upstream: UpstreamChange, local: LocalState, same_content: bool) -> MergeAction {
    match (upstream, local) {
        (_, LocalState::Added) => MergeAction::Keep,
        (UpstreamChange::Unchanged, _) => MergeAction::Keep,

        (UpstreamChange::Modified { theirs }, LocalState::Base) => MergeAction::TakeTheirs(theirs),
        (UpstreamChange::Modified { theirs }, LocalState::Modified) if same_content => {
            MergeAction::AutoResolved(theirs)
        }
        (UpstreamChange::Modified { theirs }, LocalState::Modified) => MergeAction::Conflict {
            mine: ConflictAction::Modified,
            theirs: Some(theirs),
        },
        (UpstreamChange::Modified { theirs }, LocalState::Deleted) => MergeAction::Conflict {
            mine: ConflictAction::Deleted,
            theirs: Some(theirs),
        },

        (UpstreamChange::Deleted, LocalState::Base | LocalState::Deleted) => MergeAction::DropLocal,
        (UpstreamChange::Deleted, LocalState::Modified) => MergeAction::Conflict {
            mine: ConflictAction::Modified,
            theirs: None,
        },
    }
}

/// Parent/child links between row versions of one table.
#[derive(Debug, Clone, Default)]
pub struct Lineage {
    parents: BTreeMap<RowId, RowId>,
    children: BTreeMap<RowId, Vec<RowId>>,
}

impl Lineage {
    pub fn new(rows: &[RowLifecycle]) -> Self {
        let mut lineage = Self::default();
        for row in rows {
            if let Some(parent) = row.parent {
                lineage.parents.insert(row.id, parent);
                lineage.children.entry(parent).or_default().push(row.id);
            }
        }
        for children in lineage.children.values_mut() {
            children.sort();
        }
        lineage
    }

    pub fn parent(&self, id: RowId) -> Option<RowId> {
        self.parents.get(&id).copied()
    }

    /// Follows successors of `base` until one visible at head is found.
    pub fn upstream_change(&self, base: RowId, head_visible: &BTreeSet<RowId>) -> UpstreamChange {
        if head_visible.contains(&base) {
            return UpstreamChange::Unchanged;
        }

        let mut seen = BTreeSet::new();
        let mut stack: Vec<RowId> = self.children_of(base).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if head_visible.contains(&id) {
                return UpstreamChange::Modified { theirs: id };
            }
            stack.extend(self.children_of(id).iter().rev().copied());
        }
        UpstreamChange::Deleted
    }

    /// Head-visible rows that descend from nothing visible at the pin.
    pub fn upstream_inserts(&self, base_visible: &BTreeSet<RowId>, head_visible: &BTreeSet<RowId>) -> Vec<RowId> {
        head_visible
            .iter()
            .copied()
            .filter(|id| !base_visible.contains(id))
            .filter(|id| !self.has_ancestor_in(*id, base_visible))
            .collect()
    }

    fn has_ancestor_in(&self, id: RowId, set: &BTreeSet<RowId>) -> bool {
        let mut seen = BTreeSet::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            if set.contains(&parent) {
                return true;
            }
            if !seen.insert(parent) {
                return false;
            }
            current = self.parent(parent);
        }
        false
    }

    fn children_of(&self, id: RowId) -> &[RowId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}
