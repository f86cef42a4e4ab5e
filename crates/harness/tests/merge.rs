use versiondb_core::naming::{conflicts_table, TRUNK};
use versiondb_core::{ConflictAction, FieldValue, LocalState, Revision, RevisionSpec, RowId, Side};
use versiondb_engine::{CommitOutcome, EngineError, UpdateStatus, VersioningEngine, WorkingCopy};
use versiondb_harness::{load_parcels, lot, lot_names, lots, TestDatabase, LOTS, SCHEMA};
use versiondb_storage::{DetachedStore, LocalRow, WorkingCopyStore};

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

fn rev(n: i64) -> TestResult<Revision> {
    Ok(Revision::new(n)?)
}

/// Lots `a`, `b`, `c` at revision 1 and two working copies pinned there.
fn two_copies(
    db: &TestDatabase,
) -> TestResult<(VersioningEngine, WorkingCopy<DetachedStore>, WorkingCopy<DetachedStore>)> {
    let engine = db.engine()?;
    load_parcels(
        &engine,
        db.detached_store("load"),
        &[("a", 10.0), ("b", 20.0), ("c", 30.0)],
    )?;
    let mine = engine.checkout(db.detached_store("mine"), &[lots(TRUNK)], RevisionSpec::Head)?;
    let theirs = engine.checkout(db.detached_store("theirs"), &[lots(TRUNK)], RevisionSpec::Head)?;
    Ok((engine, mine, theirs))
}

fn row_named(engine: &VersioningEngine, wc: &WorkingCopy<DetachedStore>, name: &str) -> TestResult<LocalRow> {
    Ok(engine
        .rows(wc, LOTS)?
        .into_iter()
        .find(|row| row.values[0] == FieldValue::Text(name.to_string()))
        .ok_or_else(|| format!("lot {name} missing"))?)
}

fn set_area(engine: &VersioningEngine, wc: &WorkingCopy<DetachedStore>, name: &str, area: f64) -> TestResult {
    let row = row_named(engine, wc, name)?;
    engine.update_row(wc, LOTS, row.fid, &[("area", FieldValue::Float(area))])?;
    Ok(())
}

fn area_at_head(engine: &VersioningEngine, name: &str) -> TestResult<Option<f64>> {
    Ok(engine
        .rows_at(SCHEMA, TRUNK, RevisionSpec::Head, LOTS)?
        .into_iter()
        .find(|(_, values)| values[0] == FieldValue::Text(name.to_string()))
        .and_then(|(_, values)| values[1].as_float()))
}

// ============================================================================
// Update without conflicts
// ============================================================================

#[test]
fn update_when_current_is_a_no_op() -> TestResult {
    let db = TestDatabase::new()?;
    let (engine, mine, _theirs) = two_copies(&db)?;

    let report = engine.update(&mine)?;
    assert_eq!(report.status, UpdateStatus::UpToDate);
    assert_eq!(report.from, rev(1)?);
    assert_eq!(report.to, rev(1)?);
    assert!(report.tables.is_empty());
    Ok(())
}

#[test]
fn update_merges_upstream_and_keeps_local_edits() -> TestResult {
    let db = TestDatabase::new()?;
    let (engine, mine, theirs) = two_copies(&db)?;

    set_area(&engine, &theirs, "a", 11.0)?;
    engine.delete_row(&theirs, LOTS, row_named(&engine, &theirs, "b")?.fid)?;
    engine.insert_row(&theirs, LOTS, &lot("d", 40.0))?;
    engine.commit(&theirs, "upstream work")?;

    set_area(&engine, &mine, "c", 33.0)?;
    engine.insert_row(&mine, LOTS, &lot("e", 50.0))?;
    assert_eq!(engine.late(&mine)?, 1);

    let report = engine.update(&mine)?;
    assert_eq!(report.status, UpdateStatus::Merged);
    assert_eq!(report.to, rev(2)?);
    let lots_merge = &report.tables[0];
    assert_eq!(lots_merge.applied, 1);
    assert_eq!(lots_merge.removed, 1);
    assert_eq!(lots_merge.inserted, 1);
    assert!(lots_merge.conflicts.is_empty());

    assert_eq!(engine.late(&mine)?, 0);
    assert_eq!(row_named(&engine, &mine, "a")?.values[1], FieldValue::Float(11.0));
    assert_eq!(row_named(&engine, &mine, "c")?.state, LocalState::Modified);
    assert_eq!(row_named(&engine, &mine, "e")?.state, LocalState::Added);
    assert!(row_named(&engine, &mine, "b").is_err());

    engine.commit(&mine, "local work")?;
    assert_eq!(lot_names(&engine, TRUNK)?, vec!["a", "c", "d", "e"]);
    assert_eq!(area_at_head(&engine, "a")?, Some(11.0));
    assert_eq!(area_at_head(&engine, "c")?, Some(33.0));
    Ok(())
}

#[test]
fn identical_edits_resolve_themselves() -> TestResult {
    let db = TestDatabase::new()?;
    let (engine, mine, theirs) = two_copies(&db)?;

    set_area(&engine, &theirs, "a", 12.5)?;
    engine.commit(&theirs, "resurvey a")?;
    set_area(&engine, &mine, "a", 12.5)?;

    let report = engine.update(&mine)?;
    assert_eq!(report.status, UpdateStatus::Merged);
    assert_eq!(report.tables[0].auto_resolved, 1);
    assert_eq!(report.conflict_count(), 0);

    assert_eq!(row_named(&engine, &mine, "a")?.state, LocalState::Base);
    assert_eq!(engine.commit(&mine, "nothing left")?, CommitOutcome::NothingToCommit);
    Ok(())
}

#[test]
fn update_on_branch_ignores_base_commits_after_branch_point() -> TestResult {
    let db = TestDatabase::new()?;
    let (engine, _mine, theirs) = two_copies(&db)?;
    engine.create_branch(SCHEMA, "alt", "alternative", TRUNK, RevisionSpec::Head)?;
    let alt = engine.checkout(db.detached_store("alt"), &[lots("alt")], RevisionSpec::Head)?;

    set_area(&engine, &theirs, "a", 99.0)?;
    engine.commit(&theirs, "trunk only")?;

    assert_eq!(engine.late(&alt)?, 0);
    assert_eq!(engine.update(&alt)?.status, UpdateStatus::UpToDate);
    assert_eq!(row_named(&engine, &alt, "a")?.values[1], FieldValue::Float(10.0));
    Ok(())
}

// ============================================================================
// Conflicts
// ============================================================================

#[test]
fn concurrent_edits_conflict_and_keep_both_sides() -> TestResult {
    let db = TestDatabase::new()?;
    let (engine, mine, theirs) = two_copies(&db)?;

    set_area(&engine, &theirs, "a", 20.0)?;
    engine.commit(&theirs, "theirs")?;
    set_area(&engine, &mine, "a", 15.0)?;

    let report = engine.update(&mine)?;
    assert_eq!(report.status, UpdateStatus::Conflicted);
    assert_eq!(report.conflict_count(), 1);

    let records = engine.conflicts(&mine, LOTS)?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].conflict_id, records[1].conflict_id);
    let mine_side = records.iter().find(|r| r.origin == Side::Mine).ok_or("no mine record")?;
    let theirs_side = records.iter().find(|r| r.origin == Side::Theirs).ok_or("no theirs record")?;
    assert_eq!(mine_side.values[1], FieldValue::Float(15.0));
    assert_eq!(theirs_side.values[1], FieldValue::Float(20.0));
    assert_eq!(theirs_side.action, ConflictAction::Modified);

    // The pin waits for the resolution.
    let info = engine.working_copy_info(&mine)?;
    assert_eq!(info.revision, rev(1)?);
    assert_eq!(info.pending, Some(rev(2)?));
    assert_eq!(engine.unresolved_conflicts(&mine)?, vec![LOTS.to_string()]);

    let err = engine.commit(&mine, "blocked").unwrap_err();
    assert!(matches!(err, EngineError::UnresolvedConflicts { ref tables } if tables == &vec![LOTS.to_string()]));
    let err = engine.update(&mine).unwrap_err();
    assert!(matches!(err, EngineError::UnresolvedConflicts { .. }));
    Ok(())
}

#[test]
fn keeping_mine_commits_over_theirs() -> TestResult {
    let db = TestDatabase::new()?;
    let (engine, mine, theirs) = two_copies(&db)?;

    set_area(&engine, &theirs, "a", 20.0)?;
    engine.commit(&theirs, "theirs")?;
    set_area(&engine, &mine, "a", 15.0)?;
    let report = engine.update(&mine)?;
    let conflict_id = report.tables[0].conflicts[0];

    engine.resolve_conflict(&mine, LOTS, conflict_id, Side::Mine)?;
    assert!(engine.unresolved_conflicts(&mine)?.is_empty());
    assert!(engine.conflicts(&mine, LOTS)?.is_empty());

    let info = engine.working_copy_info(&mine)?;
    assert_eq!(info.revision, rev(2)?);
    assert_eq!(info.pending, None);
    assert_eq!(engine.late(&mine)?, 0);

    let outcome = engine.commit(&mine, "mine wins")?;
    assert_eq!(outcome.revision(), Some(rev(3)?));
    assert_eq!(area_at_head(&engine, "a")?, Some(15.0));
    assert_eq!(lot_names(&engine, TRUNK)?, vec!["a", "b", "c"]);
    Ok(())
}

#[test]
fn keeping_theirs_discards_the_local_edit() -> TestResult {
    let db = TestDatabase::new()?;
    let (engine, mine, theirs) = two_copies(&db)?;

    set_area(&engine, &theirs, "a", 20.0)?;
    engine.commit(&theirs, "theirs")?;
    set_area(&engine, &mine, "a", 15.0)?;
    let conflict_id = engine.update(&mine)?.tables[0].conflicts[0];

    engine.resolve_conflict(&mine, LOTS, conflict_id, Side::Theirs)?;
    let a = row_named(&engine, &mine, "a")?;
    assert_eq!(a.state, LocalState::Base);
    assert_eq!(a.values[1], FieldValue::Float(20.0));

    assert_eq!(engine.commit(&mine, "nothing of mine")?, CommitOutcome::NothingToCommit);
    assert_eq!(area_at_head(&engine, "a")?, Some(20.0));
    Ok(())
}

#[test]
fn local_edit_of_upstream_deletion() -> TestResult {
    let db = TestDatabase::new()?;
    let (engine, mine, theirs) = two_copies(&db)?;

    engine.delete_row(&theirs, LOTS, row_named(&engine, &theirs, "b")?.fid)?;
    engine.commit(&theirs, "drop b")?;
    set_area(&engine, &mine, "b", 21.0)?;

    let report = engine.update(&mine)?;
    assert_eq!(report.conflict_count(), 1);
    let records = engine.conflicts(&mine, LOTS)?;
    let theirs_side = records.iter().find(|r| r.origin == Side::Theirs).ok_or("no theirs record")?;
    assert_eq!(theirs_side.action, ConflictAction::Deleted);
    assert_eq!(theirs_side.source_id, None);

    // Keeping the edit brings the lot back as a new row.
    engine.resolve_conflict(&mine, LOTS, report.tables[0].conflicts[0], Side::Mine)?;
    let b = row_named(&engine, &mine, "b")?;
    assert_eq!(b.state, LocalState::Added);
    assert_eq!(b.origin, None);

    engine.commit(&mine, "keep b")?;
    assert_eq!(lot_names(&engine, TRUNK)?, vec!["a", "b", "c"]);
    assert_eq!(area_at_head(&engine, "b")?, Some(21.0));
    Ok(())
}

#[test]
fn local_deletion_of_upstream_edit() -> TestResult {
    let db = TestDatabase::new()?;
    let (engine, mine, theirs) = two_copies(&db)?;

    set_area(&engine, &theirs, "c", 31.0)?;
    engine.commit(&theirs, "resurvey c")?;
    engine.delete_row(&mine, LOTS, row_named(&engine, &mine, "c")?.fid)?;

    let report = engine.update(&mine)?;
    assert_eq!(report.conflict_count(), 1);
    let records = engine.conflicts(&mine, LOTS)?;
    let mine_side = records.iter().find(|r| r.origin == Side::Mine).ok_or("no mine record")?;
    assert_eq!(mine_side.action, ConflictAction::Deleted);

    engine.resolve_conflict(&mine, LOTS, report.tables[0].conflicts[0], Side::Theirs)?;
    let c = row_named(&engine, &mine, "c")?;
    assert_eq!(c.state, LocalState::Base);
    assert_eq!(c.values[1], FieldValue::Float(31.0));
    Ok(())
}

#[test]
fn deleting_a_side_with_sql_unblocks_update_and_commit() -> TestResult {
    let db = TestDatabase::new()?;
    let (engine, mine, theirs) = two_copies(&db)?;

    set_area(&engine, &theirs, "a", 20.0)?;
    engine.commit(&theirs, "theirs")?;
    set_area(&engine, &mine, "a", 15.0)?;
    assert_eq!(engine.update(&mine)?.status, UpdateStatus::Conflicted);

    let conflicts = mine.store().qualified(&conflicts_table(LOTS));
    let deleted = engine
        .session()
        .execute(&format!("DELETE FROM {conflicts} WHERE origin = 'theirs'"), [])?;
    assert_eq!(deleted, 1);

    // Upstream moves on while the resolution is not yet seen by the engine.
    set_area(&engine, &theirs, "b", 99.0)?;
    engine.commit(&theirs, "resurvey b")?;

    assert!(engine.unresolved_conflicts(&mine)?.is_empty());
    let info = engine.working_copy_info(&mine)?;
    assert_eq!(info.revision, rev(2)?);
    assert_eq!(info.pending, None);
    assert_eq!(engine.late(&mine)?, 1);

    let report = engine.update(&mine)?;
    assert_eq!(report.status, UpdateStatus::Merged);
    assert_eq!(report.from, rev(2)?);
    assert_eq!(report.to, rev(3)?);
    assert_eq!(report.tables[0].applied, 1);
    assert_eq!(row_named(&engine, &mine, "a")?.state, LocalState::Modified);

    let outcome = engine.commit(&mine, "mine after sql resolution")?;
    assert_eq!(outcome.revision(), Some(rev(4)?));
    assert_eq!(area_at_head(&engine, "a")?, Some(15.0));
    assert_eq!(area_at_head(&engine, "b")?, Some(99.0));
    Ok(())
}

#[test]
fn resolving_an_unknown_conflict_fails() -> TestResult {
    let db = TestDatabase::new()?;
    let (engine, mine, _theirs) = two_copies(&db)?;

    let err = engine
        .resolve_conflict(&mine, LOTS, RowId::new(42), Side::Mine)
        .unwrap_err();
    assert!(matches!(err, EngineError::ConflictNotFound { conflict_id: 42, .. }));
    Ok(())
}
