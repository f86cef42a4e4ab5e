pub mod branch_graph;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod merge;
pub mod naming;
pub mod revision;

pub use branch_graph::{visible_rows, BranchBase, BranchGraph, BranchSource, RowLifecycle, MAX_BRANCH_DEPTH};
pub use error::CoreError;
pub use field_value::FieldValue;
pub use merge::{reconcile, ConflictAction, Lineage, LocalState, MergeAction, Side, UpstreamChange};
pub use ids::*;
pub use revision::{Revision, RevisionSpec};
