use serde::{Deserialize, Serialize};

use versiondb_core::naming::quote_ident;
use versiondb_core::{ConflictAction, FieldValue, LocalState, Revision, RowId, Side};

use crate::error::StorageError;
use crate::sqlite::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreKind {
    /// A separate database file attached to the session.
    Detached,
    /// A working-copy schema inside the versioned database.
    LiveSchema,
}

/// Where the relations of a working copy live.
///
/// Relations are addressed two ways: `qualified` names (database alias plus
/// relation) for statements issued by the engine, and `local` names for
/// references inside view and trigger bodies, which SQLite resolves within
/// the database that owns the view or trigger.
pub trait WorkingCopyStore {
    fn kind(&self) -> StoreKind;

    /// Database alias holding the working copy (`main` or an attached alias).
    fn database(&self) -> &str;

    /// Relation name of a working-copy object.
    fn relation(&self, name: &str) -> String;

    /// Makes the store reachable from the session. Idempotent.
    fn attach(&self, session: &Session) -> Result<(), StorageError>;

    fn detach(&self, session: &Session) -> Result<(), StorageError>;

    /// Removes every trace of the working copy.
    fn discard(&self, session: &Session) -> Result<(), StorageError>;

    /// Human-readable location, for messages.
    fn location(&self) -> String;

    /// Whether something already occupies the store's location.
    fn is_occupied(&self, session: &Session) -> Result<bool, StorageError>;

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}", quote_ident(self.database()), quote_ident(&self.relation(name)))
    }

    fn local(&self, name: &str) -> String {
        quote_ident(&self.relation(name))
    }
}

/// Pin of one checked-out table: the source it was copied from and the
/// revision its rows reflect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutPin {
    pub table: String,
    pub source_database: String,
    pub schema: String,
    pub branch: String,
    pub pkey: String,
    pub revision: Revision,
    /// Revision an update with open conflicts is waiting to advance to.
    pub pending: Option<Revision>,
}

/// A row of a working-copy table.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRow {
    pub fid: i64,
    /// Identity of the version the row was checked out from; `None` for added rows.
    pub origin: Option<RowId>,
    pub state: LocalState,
    pub values: Vec<FieldValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    pub cflt_fid: i64,
    pub conflict_id: RowId,
    pub origin: Side,
    pub action: ConflictAction,
    /// Working-copy row for `mine`, upstream version for `theirs` (absent when deleted).
    pub source_id: Option<i64>,
    pub values: Vec<FieldValue>,
}
