use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid branch name {0:?}: must be non-empty and contain no underscore or space")]
    InvalidBranchName(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid revision: {0}")]
    InvalidRevision(String),

    #[error("unknown branch: {0}")]
    UnknownBranch(String),

    #[error("branch ancestry cycle through {0}")]
    BranchCycle(String),

    #[error("branch ancestry of {branch} deeper than {max} levels")]
    BranchDepthExceeded { branch: String, max: usize },

    #[error("invalid data: {0}")]
    InvalidData(String),
}
