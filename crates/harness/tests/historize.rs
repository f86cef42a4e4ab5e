use versiondb_core::naming::TRUNK;
use versiondb_core::{Revision, RevisionSpec};
use versiondb_engine::{EngineConfig, EngineError, INITIAL_COMMIT};
use versiondb_harness::{create_parcels, load_parcels, TestDatabase, LOTS, SCHEMA};
use versiondb_storage::ViewStatus;

// ============================================================================
// Historizer
// ============================================================================

#[test]
fn historize_creates_trunk_and_initial_revision() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let engine = db.engine()?;
    create_parcels(&engine)?;

    let report = engine.historize(SCHEMA)?;
    assert_eq!(report.tables, vec!["lots".to_string(), "owners".to_string()]);
    assert!(report.skipped.is_empty());
    assert_eq!(report.views.schema_name, "parcels_trunk_rev_head");
    assert_eq!(report.views.views.len(), 2);
    assert_eq!(report.views.status, ViewStatus::Created);

    let revisions = engine.list_revisions(SCHEMA)?;
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].revision, Revision::ZERO);
    assert_eq!(revisions[0].branch, TRUNK);
    assert_eq!(revisions[0].commit_msg.as_deref(), Some(INITIAL_COMMIT));
    assert_eq!(revisions[0].author.as_deref(), Some("tester"));

    let branches = engine.list_branches(SCHEMA)?;
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0].name, TRUNK);
    assert!(branches[0].base.is_none());

    assert_eq!(engine.current_revision(SCHEMA, TRUNK)?, Revision::ZERO);
    Ok(())
}

#[test]
fn historize_adds_lifecycle_columns() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let engine = db.engine()?;
    create_parcels(&engine)?;
    engine.historize(SCHEMA)?;

    let count: i64 = engine.session().query_row(
        "SELECT COUNT(*) FROM pragma_table_info('parcels.lots') WHERE name LIKE 'versioning%'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(count, 4);
    Ok(())
}

#[test]
fn historize_twice_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let engine = db.engine()?;
    create_parcels(&engine)?;
    engine.historize(SCHEMA)?;

    let err = engine.historize(SCHEMA).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyVersioned(ref s) if s == SCHEMA));
    Ok(())
}

#[test]
fn historize_unknown_schema_fails() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let engine = db.engine()?;

    let err = engine.historize("nowhere").unwrap_err();
    assert!(matches!(err, EngineError::UnknownSchema(_)));
    Ok(())
}

#[test]
fn table_without_primary_key_aborts_historize() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let engine = db.engine()?;
    create_parcels(&engine)?;
    engine.session().exec_batch(r#"CREATE TABLE "parcels.notes" (body TEXT);"#)?;

    let err = engine.historize(SCHEMA).unwrap_err();
    assert!(matches!(err, EngineError::MissingPrimaryKey(ref t) if t.contains("notes")));

    // The failed run left no registry behind.
    let err = engine.list_revisions(SCHEMA).unwrap_err();
    assert!(matches!(err, EngineError::NotVersioned(_)));
    Ok(())
}

#[test]
fn skip_mode_leaves_tables_without_primary_key_alone() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let engine = db.engine_with(EngineConfig {
        skip_tables_without_pk: true,
        ..TestDatabase::config()
    })?;
    create_parcels(&engine)?;
    engine.session().exec_batch(r#"CREATE TABLE "parcels.notes" (body TEXT);"#)?;

    let report = engine.historize(SCHEMA)?;
    assert_eq!(report.skipped, vec!["notes".to_string()]);
    assert_eq!(report.tables.len(), 2);
    Ok(())
}

// ============================================================================
// View materializer
// ============================================================================

#[test]
fn build_view_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let engine = db.engine()?;
    load_parcels(&engine, db.detached_store("load"), &[("a", 1.0), ("b", 2.0)])?;

    let head = engine.build_view(SCHEMA, TRUNK, RevisionSpec::Head)?;
    assert_eq!(head.status, ViewStatus::Existing);

    let rev1 = RevisionSpec::At(Revision::new(1)?);
    let first = engine.build_view(SCHEMA, TRUNK, rev1)?;
    assert_eq!(first.status, ViewStatus::Created);
    assert_eq!(first.schema_name, "parcels_trunk_rev_1");

    let second = engine.build_view(SCHEMA, TRUNK, rev1)?;
    assert_eq!(second.status, ViewStatus::Existing);
    assert_eq!(second.views, first.views);
    Ok(())
}

#[test]
fn views_show_rows_visible_at_their_revision() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let engine = db.engine()?;
    load_parcels(&engine, db.detached_store("load"), &[("a", 1.0), ("b", 2.0)])?;

    engine.build_view(SCHEMA, TRUNK, RevisionSpec::At(Revision::ZERO))?;
    engine.build_view(SCHEMA, TRUNK, RevisionSpec::At(Revision::new(1)?))?;

    let count = |view: &str| -> Result<i64, Box<dyn std::error::Error>> {
        let sql = format!("SELECT COUNT(*) FROM \"{view}.{LOTS}\"");
        Ok(engine.session().query_row(&sql, [], |row| row.get(0))?)
    };
    assert_eq!(count("parcels_trunk_rev_0")?, 0);
    assert_eq!(count("parcels_trunk_rev_1")?, 2);
    assert_eq!(count("parcels_trunk_rev_head")?, 2);

    let mut stmt = engine
        .session()
        .prepare("SELECT name FROM \"parcels_trunk_rev_head.lots\" ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    Ok(())
}

#[test]
fn view_beyond_branch_head_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDatabase::new()?;
    let engine = db.engine()?;
    create_parcels(&engine)?;
    engine.historize(SCHEMA)?;

    let err = engine
        .build_view(SCHEMA, TRUNK, RevisionSpec::At(Revision::new(5)?))
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownRevision { revision: 5, .. }));

    let err = engine.build_view(SCHEMA, "ghost", RevisionSpec::Head).unwrap_err();
    assert!(matches!(err, EngineError::UnknownBranch(_)));
    Ok(())
}
