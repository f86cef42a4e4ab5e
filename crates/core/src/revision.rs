use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A revision number. One increasing sequence is shared by every branch of a
/// historized schema; revision 0 is the state before any commit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(i64);

impl Revision {
    pub const ZERO: Revision = Revision(0);

    pub fn new(value: i64) -> Result<Self, CoreError> {
        if value < 0 {
            return Err(CoreError::InvalidRevision(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Either a fixed revision or the moving head of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevisionSpec {
    Head,
    At(Revision),
}

impl RevisionSpec {
    pub fn fixed(self) -> Option<Revision> {
        match self {
            RevisionSpec::Head => None,
            RevisionSpec::At(rev) => Some(rev),
        }
    }
}

impl From<Revision> for RevisionSpec {
    fn from(rev: Revision) -> Self {
        RevisionSpec::At(rev)
    }
}

impl fmt::Display for RevisionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionSpec::Head => f.write_str("head"),
            RevisionSpec::At(rev) => write!(f, "{rev}"),
        }
    }
}

impl FromStr for RevisionSpec {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "head" {
            return Ok(RevisionSpec::Head);
        }
        let value: i64 = s
            .parse()
            .map_err(|_| CoreError::InvalidRevision(s.to_string()))?;
        Ok(RevisionSpec::At(Revision::new(value)?))
    }
}
