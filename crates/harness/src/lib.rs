pub mod dataset;

pub use dataset::{create_parcels, load_parcels, lot, lot_names, lots, owners, point_wkb, LOTS, OWNERS, SCHEMA};

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use versiondb_engine::{EngineConfig, EngineError, VersioningEngine};
use versiondb_storage::{DetachedStore, LiveSchemaStore, StorageError};

pub const TEST_AUTHOR: &str = "tester";

/// A versioned database file in a temporary directory, with room beside it
/// for detached working copies. Everything is removed on drop.
pub struct TestDatabase {
    dir: TempDir,
    path: PathBuf,
}

impl TestDatabase {
    pub fn new() -> Result<Self, StorageError> {
        let dir = TempDir::new()?;
        let path = dir.path().join("versioned.sqlite");
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn config() -> EngineConfig {
        EngineConfig {
            author: Some(TEST_AUTHOR.to_string()),
            ..EngineConfig::default()
        }
    }

    /// A fresh session on the database. Several engines may share one file.
    pub fn engine(&self) -> Result<VersioningEngine, EngineError> {
        self.engine_with(Self::config())
    }

    pub fn engine_with(&self, config: EngineConfig) -> Result<VersioningEngine, EngineError> {
        VersioningEngine::open_path(&self.path, config)
    }

    pub fn detached_store(&self, name: &str) -> DetachedStore {
        DetachedStore::new(self.dir.path().join(format!("{name}.sqlite")))
    }

    pub fn live_store(&self, name: &str) -> Result<LiveSchemaStore, StorageError> {
        LiveSchemaStore::new(name)
    }
}
