pub mod catalog;
pub mod error;
pub mod historize;
pub mod registry;
pub mod rows;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod values;
pub mod views;
pub mod visibility;
pub mod working_copy;

pub use catalog::ColumnInfo;
pub use error::StorageError;
pub use registry::{BranchRecord, RevisionRecord, VersionedTable};
pub use sqlite::{
    ConnectionInfo, ConnectionProvider, CredentialResolver, Credentials, EnvCredentials, Session, SqliteProvider,
    StaticCredentials,
};
pub use traits::*;
pub use views::{ViewSet, ViewStatus};
pub use working_copy::{DetachedStore, LiveSchemaStore};
