//! The `parcels` fixture: land lots and their owners.

use versiondb_core::naming::{SourceTable, TRUNK};
use versiondb_core::{FieldValue, Revision, RevisionSpec};
use versiondb_engine::{EngineError, VersioningEngine};
use versiondb_storage::{StorageError, WorkingCopyStore};

pub const SCHEMA: &str = "parcels";
pub const LOTS: &str = "lots";
pub const OWNERS: &str = "owners";

const PARCELS_DDL: &str = r#"
CREATE TABLE "parcels.lots" (
    id INTEGER PRIMARY KEY,
    name TEXT,
    area REAL,
    geom BLOB
);
CREATE TABLE "parcels.owners" (
    id INTEGER PRIMARY KEY,
    name TEXT,
    lot_id INTEGER
);
"#;

pub fn create_parcels(engine: &VersioningEngine) -> Result<(), StorageError> {
    engine.session().exec_batch(PARCELS_DDL)
}

/// Column values of a lot, as passed to `insert_row`. The geometry is a WKB point.
pub fn lot(name: &str, area: f64) -> Vec<(&'static str, FieldValue)> {
    vec![
        ("name", FieldValue::Text(name.to_string())),
        ("area", FieldValue::Float(area)),
        ("geom", FieldValue::Bytes(point_wkb(area, area))),
    ]
}

pub fn lots(branch: &str) -> SourceTable {
    SourceTable::new(SCHEMA, branch, LOTS)
}

pub fn owners(branch: &str) -> SourceTable {
    SourceTable::new(SCHEMA, branch, OWNERS)
}

/// Little-endian WKB for `POINT(x y)`.
pub fn point_wkb(x: f64, y: f64) -> Vec<u8> {
    let mut wkb = vec![1u8];
    wkb.extend_from_slice(&1u32.to_le_bytes());
    wkb.extend_from_slice(&x.to_le_bytes());
    wkb.extend_from_slice(&y.to_le_bytes());
    wkb
}

/// Names of the lots visible at the head of `branch`, sorted.
pub fn lot_names(engine: &VersioningEngine, branch: &str) -> Result<Vec<String>, EngineError> {
    let rows = engine.rows_at(SCHEMA, branch, RevisionSpec::Head, LOTS)?;
    let mut names: Vec<String> = rows
        .iter()
        .filter_map(|(_, values)| values.first().and_then(FieldValue::as_text).map(str::to_string))
        .collect();
    names.sort();
    Ok(names)
}

/// Creates and historizes the fixture, then commits `initial` lots to trunk
/// through a throwaway working copy. Returns the revision of that commit.
pub fn load_parcels<S: WorkingCopyStore>(
    engine: &VersioningEngine,
    store: S,
    initial: &[(&str, f64)],
) -> Result<Revision, Box<dyn std::error::Error>> {
    create_parcels(engine)?;
    engine.historize(SCHEMA)?;

    let wc = engine.checkout(store, &[lots(TRUNK)], RevisionSpec::Head)?;
    for (name, area) in initial {
        engine.insert_row(&wc, LOTS, &lot(name, *area))?;
    }
    let outcome = engine.commit(&wc, "initial load")?;
    engine.discard_working_copy(wc)?;
    outcome.revision().ok_or_else(|| "initial load committed nothing".into())
}
