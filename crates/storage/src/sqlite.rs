//! Session and connection plumbing for the SQLite backing store.
//!
//! The engine never opens connections itself: a [`ConnectionProvider`] turns
//! [`ConnectionInfo`] into a live connection and a [`CredentialResolver`]
//! supplies the user when the connection info does not carry one.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Params, Row, Statement};
use serde::{Deserialize, Serialize};
use tracing::trace;

use versiondb_core::naming::quote_ident;

use crate::error::StorageError;
use crate::schema::{init_connection, DEFAULT_BUSY_TIMEOUT_MS};

pub const MEMORY_DATABASE: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Database file path, or `:memory:`.
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectionInfo {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            user: None,
            password: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MEMORY_DATABASE)
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn is_memory(&self) -> bool {
        self.database == MEMORY_DATABASE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
}

pub trait CredentialResolver {
    fn resolve(&self, info: &ConnectionInfo) -> Result<Option<Credentials>, StorageError>;
}

#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, _info: &ConnectionInfo) -> Result<Option<Credentials>, StorageError> {
        Ok(Some(self.0.clone()))
    }
}

/// Reads the login name of the current process (`USER`, then `USERNAME`).
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialResolver for EnvCredentials {
    fn resolve(&self, _info: &ConnectionInfo) -> Result<Option<Credentials>, StorageError> {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .ok()
            .filter(|user| !user.is_empty());
        Ok(user.map(|user| Credentials { user, password: None }))
    }
}

pub trait ConnectionProvider {
    fn connect(&self, info: &ConnectionInfo) -> Result<Connection, StorageError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SqliteProvider {
    pub busy_timeout_ms: u32,
}

impl Default for SqliteProvider {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl ConnectionProvider for SqliteProvider {
    fn connect(&self, info: &ConnectionInfo) -> Result<Connection, StorageError> {
        let conn = if info.is_memory() {
            Connection::open_in_memory()?
        } else {
            Connection::open(&info.database)?
        };
        init_connection(&conn, self.busy_timeout_ms, !info.is_memory())?;
        Ok(conn)
    }
}

fn log_sql(sql: &str) {
    trace!(target: "versiondb::sql", sql = sql.trim(), "execute");
}

/// One live connection to a versioned database plus the identity using it.
pub struct Session {
    conn: Connection,
    info: ConnectionInfo,
    credentials: Option<Credentials>,
}

impl Session {
    pub fn open(
        info: ConnectionInfo,
        provider: &dyn ConnectionProvider,
        resolver: &dyn CredentialResolver,
    ) -> Result<Self, StorageError> {
        let credentials = match &info.user {
            Some(user) => Some(Credentials {
                user: user.clone(),
                password: info.password.clone(),
            }),
            None => resolver.resolve(&info)?,
        };
        let conn = provider.connect(&info)?;
        Ok(Self {
            conn,
            info,
            credentials,
        })
    }

    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let database = path.as_ref().to_string_lossy().into_owned();
        Self::open(ConnectionInfo::new(database), &SqliteProvider::default(), &EnvCredentials)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::open(ConnectionInfo::in_memory(), &SqliteProvider::default(), &EnvCredentials)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Identifier of the database this session is connected to.
    pub fn database(&self) -> &str {
        &self.info.database
    }

    pub fn user(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.user.as_str())
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize, StorageError> {
        log_sql(sql);
        Ok(self.conn.execute(sql, params)?)
    }

    pub fn exec_batch(&self, sql: &str) -> Result<(), StorageError> {
        log_sql(sql);
        Ok(self.conn.execute_batch(sql)?)
    }

    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>, StorageError> {
        log_sql(sql);
        Ok(self.conn.prepare(sql)?)
    }

    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<T, StorageError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        log_sql(sql);
        Ok(self.conn.query_row(sql, params, f)?)
    }

    pub fn query_optional<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>, StorageError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        log_sql(sql);
        Ok(self.conn.query_row(sql, params, f).optional()?)
    }

    /// Run `f` inside `BEGIN IMMEDIATE`, committing on success and rolling
    /// back on any error.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StorageError>,
        F: FnOnce(&Session) -> Result<T, E>,
    {
        self.exec_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(value) => {
                self.exec_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.exec_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Whether a table, view or trigger named `name` exists in `database`
    /// (`main` or an attached alias).
    pub fn relation_exists(&self, database: &str, name: &str) -> Result<bool, StorageError> {
        let sql = format!("SELECT 1 FROM {}.sqlite_master WHERE name = ?1", quote_ident(database));
        Ok(self.query_optional(&sql, [name], |_| Ok(()))?.is_some())
    }

    /// Journal mode of `database` (`main` or an attached alias), lower case.
    pub fn journal_mode(&self, database: &str) -> Result<String, StorageError> {
        let mode: String = self.query_row(&format!("PRAGMA {}.journal_mode", quote_ident(database)), [], |row| {
            row.get(0)
        })?;
        Ok(mode.to_ascii_lowercase())
    }

    /// Whether `alias` is currently attached to this connection.
    pub fn is_attached(&self, alias: &str) -> Result<bool, StorageError> {
        let mut stmt = self.prepare("SELECT name FROM pragma_database_list")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names.iter().any(|name| name == alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_user_wins_over_resolver() -> Result<(), Box<dyn std::error::Error>> {
        let resolver = StaticCredentials(Credentials {
            user: "resolver".into(),
            password: None,
        });
        let session = Session::open(
            ConnectionInfo::in_memory().with_user("alice"),
            &SqliteProvider::default(),
            &resolver,
        )?;
        assert_eq!(session.user(), Some("alice"));

        let session = Session::open(ConnectionInfo::in_memory(), &SqliteProvider::default(), &resolver)?;
        assert_eq!(session.user(), Some("resolver"));
        assert_eq!(session.database(), MEMORY_DATABASE);
        Ok(())
    }

    #[test]
    fn failed_transaction_rolls_back() -> Result<(), Box<dyn std::error::Error>> {
        let session = Session::open_in_memory()?;
        session.exec_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")?;

        let result: Result<(), StorageError> = session.with_transaction(|s| {
            s.execute("INSERT INTO t (id) VALUES (1)", [])?;
            Err(StorageError::InvalidData("boom".into()))
        });
        assert!(result.is_err());

        let count: i64 = session.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?;
        assert_eq!(count, 0);
        assert!(session.relation_exists("main", "t")?);
        assert!(!session.relation_exists("main", "missing")?);
        Ok(())
    }
}
