//! In-memory index of the branch registry and the row visibility rule.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::RowId;
use crate::revision::Revision;

pub const MAX_BRANCH_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchBase {
    pub branch: String,
    pub revision: Revision,
}

/// One link of an ancestry chain: rows created on `branch` count up to
/// `cutoff` (inclusive). `None` means the moving head of the branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSource {
    pub branch: String,
    pub cutoff: Option<Revision>,
}

impl BranchSource {
    /// A version created on `branch` at `created` exists from this source's point of view.
    pub fn admits(&self, branch: &str, created: Revision) -> bool {
        self.branch == branch && self.cutoff.is_none_or(|cutoff| created <= cutoff)
    }

    /// The row exists and has not been removed on its own branch.
    pub fn is_live(&self, row: &RowLifecycle) -> bool {
        if !self.admits(&row.branch, row.created) {
            return false;
        }
        match (row.removed, self.cutoff) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(removed), Some(cutoff)) => removed > cutoff,
        }
    }
}

/// Lifecycle columns of one row version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowLifecycle {
    pub id: RowId,
    pub branch: String,
    pub created: Revision,
    pub removed: Option<Revision>,
    pub parent: Option<RowId>,
}

/// Rows visible through `sources`: live in some link of the chain and not
/// superseded by a successor version that also exists in the chain.
pub fn visible_rows(sources: &[BranchSource], rows: &[RowLifecycle]) -> BTreeSet<RowId> {
    let superseded: BTreeSet<RowId> = rows
        .iter()
        .filter(|row| sources.iter().any(|s| s.admits(&row.branch, row.created)))
        .filter_map(|row| row.parent)
        .collect();

    rows.iter()
        .filter(|row| !superseded.contains(&row.id))
        .filter(|row| sources.iter().any(|s| s.is_live(row)))
        .map(|row| row.id)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct BranchGraph {
    nodes: BTreeMap<String, Option<BranchBase>>,
}

impl BranchGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, base: Option<BranchBase>) {
        self.nodes.insert(name.into(), base);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn base(&self, name: &str) -> Option<&BranchBase> {
        self.nodes.get(name).and_then(Option::as_ref)
    }

    pub fn branches(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Ancestry chain of `branch` seen at `revision` (`None` = head): the branch
    /// itself, then each base branch capped at the base revision it was forked
    /// from, never above the cutoff inherited from below.
    pub fn sources(&self, branch: &str, revision: Option<Revision>) -> Result<Vec<BranchSource>, CoreError> {
        if !self.contains(branch) {
            return Err(CoreError::UnknownBranch(branch.to_string()));
        }

        let mut sources = vec![BranchSource {
            branch: branch.to_string(),
            cutoff: revision,
        }];
        let mut seen = BTreeSet::from([branch.to_string()]);
        let mut current = branch.to_string();
        let mut inherited = revision;

        for _ in 0..MAX_BRANCH_DEPTH {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| CoreError::UnknownBranch(current.clone()))?;
            let Some(base) = node else {
                return Ok(sources);
            };
            if !seen.insert(base.branch.clone()) {
                return Err(CoreError::BranchCycle(base.branch.clone()));
            }

            let cutoff = match inherited {
                None => base.revision,
                Some(prev) => prev.min(base.revision),
            };
            sources.push(BranchSource {
                branch: base.branch.clone(),
                cutoff: Some(cutoff),
            });
            inherited = Some(cutoff);
            current = base.branch.clone();
        }

        Err(CoreError::BranchDepthExceeded {
            branch: branch.to_string(),
            max: MAX_BRANCH_DEPTH,
        })
    }
}
