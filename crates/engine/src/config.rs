use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use versiondb_storage::schema::DEFAULT_BUSY_TIMEOUT_MS;

pub const NO_PK_VAR: &str = "VERSIONING_NO_PK";
pub const AUTHOR_VAR: &str = "VERSIONING_AUTHOR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Author recorded on revisions, ahead of the session user.
    pub author: Option<String>,
    /// Historize skips tables without an INTEGER primary key instead of failing.
    pub skip_tables_without_pk: bool,
    pub busy_timeout_ms: u32,
    pub default_commit_author: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            author: None,
            skip_tables_without_pk: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            default_commit_author: "unknown".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from a variable lookup: `VERSIONING_NO_PK=skip`
    /// and `VERSIONING_AUTHOR`.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(value) = lookup(NO_PK_VAR) {
            config.skip_tables_without_pk = value.eq_ignore_ascii_case("skip");
        }
        config.author = lookup(AUTHOR_VAR).filter(|author| !author.is_empty());
        config
    }

    pub fn to_json_string(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
