//! Relation naming rules shared by every component.
//!
//! SQLite has a single namespace per database, so a schema-qualified relation
//! `{schema}.{table}` is stored under that exact string as one identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::revision::RevisionSpec;

pub const TRUNK: &str = "trunk";
const HEAD_VIEW_SUFFIX: &str = "_rev_head";

/// Branch names double as separators in view schema names.
pub fn validate_branch_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() || name.contains('_') || name.chars().any(char::is_whitespace) || name.contains('.') {
        return Err(CoreError::InvalidBranchName(name.to_string()));
    }
    Ok(())
}

pub fn validate_schema_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() || name.contains('.') {
        return Err(CoreError::InvalidName(format!("schema {name:?}")));
    }
    Ok(())
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote an SQL string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `{schema}_{branch}_rev_{revision|head}`
pub fn view_schema(schema: &str, branch: &str, revision: RevisionSpec) -> String {
    format!("{schema}_{branch}_rev_{revision}")
}

pub fn conflicts_table(table: &str) -> String {
    format!("{table}_conflicts")
}

pub fn edit_view(table: &str) -> String {
    format!("{table}_view")
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub schema: String,
    pub table: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn parse(name: &str) -> Result<Self, CoreError> {
        match name.split_once('.') {
            Some((schema, table)) if !schema.is_empty() && !table.is_empty() && !table.contains('.') => {
                Ok(Self::new(schema, table))
            }
            _ => Err(CoreError::InvalidName(format!("{name:?} is not schema.table"))),
        }
    }

    /// The relation name as stored in the database.
    pub fn relation(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn quoted(&self) -> String {
        quote_ident(&self.relation())
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// A table selected for checkout: one table of a branch of a historized schema,
/// optionally tagged with the database it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceTable {
    pub database: Option<String>,
    pub schema: String,
    pub branch: String,
    pub table: String,
}

impl SourceTable {
    pub fn new(schema: impl Into<String>, branch: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: None,
            schema: schema.into(),
            branch: branch.into(),
            table: table.into(),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Parse a head view name, `{schema}_{branch}_rev_head.{table}`.
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        let qualified = QualifiedName::parse(name)?;
        let prefix = qualified
            .schema
            .strip_suffix(HEAD_VIEW_SUFFIX)
            .ok_or_else(|| CoreError::InvalidName(format!("{name:?} does not end with {HEAD_VIEW_SUFFIX}")))?;
        let (schema, branch) = prefix
            .rsplit_once('_')
            .filter(|(schema, _)| !schema.is_empty())
            .ok_or_else(|| CoreError::InvalidName(format!("{name:?} has no branch component")))?;
        validate_branch_name(branch)?;
        Ok(Self::new(schema, branch, qualified.table))
    }

    pub fn qualified(&self) -> QualifiedName {
        QualifiedName::new(self.schema.clone(), self.table.clone())
    }
}

impl fmt::Display for SourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(database) = &self.database {
            write!(f, "{database}:")?;
        }
        write!(f, "{}.{}", view_schema(&self.schema, &self.branch, RevisionSpec::Head), self.table)
    }
}
