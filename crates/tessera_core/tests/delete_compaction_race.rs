//! Deletes racing a compaction of the same segments.

mod common;

use common::{database, import, keys, row, segments, DB, TABLE};
use std::sync::Barrier;
use tessera_core::{Config, CoreError, SegmentId, SegmentSelection, TransactionKind};

#[test]
fn delete_committed_during_compaction_is_carried_over() {
    let db = database(Config::default());
    import(&db, TABLE, 0, 5);
    import(&db, TABLE, 5, 5);

    let delete = || common::delete(&db, TABLE, &[row(0, 1), row(1, 4)]);
    let ts = db
        .compaction()
        .manual_compact(DB, TABLE, SegmentSelection::All, Some(&delete));
    assert!(ts.is_some());

    let info = &segments(&db, TABLE)[0];
    assert_eq!(info.segment_id, SegmentId::new(2));
    assert_eq!(info.row_count, 10);
    assert_eq!(info.actual_row_count, 8);
    assert_eq!(keys(&db, TABLE), vec![0, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn carried_deletes_land_in_the_right_output_segment() {
    let db = database(Config::new().block_capacity(4).segment_capacity(8));
    for i in 0..3 {
        import(&db, TABLE, i * 6, 6);
    }
    // One row is already gone before the compaction starts.
    common::delete(&db, TABLE, &[row(0, 0)]);

    // Source 1 starts at output row 5 and source 2 at output row 11.
    let delete = || common::delete(&db, TABLE, &[row(1, 3), row(2, 5)]);
    assert!(db
        .compaction()
        .manual_compact(DB, TABLE, SegmentSelection::All, Some(&delete))
        .is_some());

    let live: Vec<(u32, u64, u64)> = segments(&db, TABLE)
        .iter()
        .map(|s| (s.segment_id.as_u32(), s.row_count, s.actual_row_count))
        .collect();
    assert_eq!(live, vec![(3, 8, 8), (4, 8, 7), (5, 1, 0)]);

    let mut expected: Vec<i64> = (1..18).collect();
    expected.retain(|&k| k != 9 && k != 17);
    assert_eq!(keys(&db, TABLE), expected);
}

#[test]
fn delete_committing_after_compaction_conflicts() {
    let db = database(Config::default());
    import(&db, TABLE, 0, 4);
    import(&db, TABLE, 4, 4);

    let mut del = db.begin("delete", TransactionKind::Normal).unwrap();
    del.delete(DB, TABLE, &[row(0, 2)]).unwrap();

    assert!(db.compact(DB, TABLE, SegmentSelection::All).is_some());

    let err = db.commit(&mut del).unwrap_err();
    assert!(err.is_conflict(), "{err}");
    assert!(!del.is_running());
    assert_eq!(keys(&db, TABLE), (0..8).collect::<Vec<_>>());
    assert_eq!(db.stats().conflicts, 1);
}

#[test]
fn stale_row_ids_after_compaction_conflict() {
    let db = database(Config::default());
    import(&db, TABLE, 0, 4);
    import(&db, TABLE, 4, 4);
    let mut old = db.begin("old", TransactionKind::Normal).unwrap();

    assert!(db.compact(DB, TABLE, SegmentSelection::All).is_some());

    // A transaction that began before the compaction committed.
    let err = old.delete(DB, TABLE, &[row(1, 0)]).unwrap_err();
    assert!(err.is_conflict());
    assert!(old.is_doomed());
    assert!(db.commit(&mut old).unwrap_err().is_conflict());

    // And one that began after it, still using the old ids.
    let mut fresh = db.begin("fresh", TransactionKind::Normal).unwrap();
    let err = fresh.delete(DB, TABLE, &[row(0, 0)]).unwrap_err();
    assert!(matches!(err, CoreError::TransactionConflict { .. }));
    db.rollback(&mut fresh).unwrap();

    // The new ids work.
    common::delete(&db, TABLE, &[row(2, 0)]);
    assert_eq!(keys(&db, TABLE), (1..8).collect::<Vec<_>>());
}

#[test]
fn doomed_transaction_applies_nothing() {
    let db = database(Config::default());
    import(&db, TABLE, 0, 4);
    let mut txn = db.begin("mixed", TransactionKind::Normal).unwrap();
    txn.import(DB, TABLE, vec![common::block(50, 2)]).unwrap();

    assert!(db.compact(DB, TABLE, SegmentSelection::All).is_some());
    assert!(txn.delete(DB, TABLE, &[row(0, 1)]).unwrap_err().is_conflict());
    assert!(txn
        .import(DB, TABLE, vec![common::block(60, 1)])
        .unwrap_err()
        .is_conflict());
    assert!(db.commit(&mut txn).unwrap_err().is_conflict());

    assert_eq!(keys(&db, TABLE), vec![0, 1, 2, 3]);
}

#[test]
fn concurrent_deletes_of_one_row_first_committer_wins() {
    let db = database(Config::default());
    import(&db, TABLE, 0, 4);
    let mut a = db.begin("a", TransactionKind::Normal).unwrap();
    let mut b = db.begin("b", TransactionKind::Normal).unwrap();
    a.delete(DB, TABLE, &[row(0, 1)]).unwrap();
    b.delete(DB, TABLE, &[row(0, 1), row(0, 2)]).unwrap();

    db.commit(&mut a).unwrap();
    assert!(db.commit(&mut b).unwrap_err().is_conflict());
    assert_eq!(keys(&db, TABLE), vec![0, 2, 3]);

    // Deleting it again from a fresh snapshot is a caller error.
    let mut c = db.begin("c", TransactionKind::Normal).unwrap();
    assert!(matches!(
        c.delete(DB, TABLE, &[row(0, 1)]),
        Err(CoreError::InvalidArgument { .. })
    ));
}

#[test]
fn delete_outside_the_snapshot_is_not_found() {
    let db = database(Config::default());
    import(&db, TABLE, 0, 4);
    let mut early = db.begin("early", TransactionKind::Normal).unwrap();
    import(&db, TABLE, 4, 4);

    let err = early.delete(DB, TABLE, &[row(1, 0)]).unwrap_err();
    assert!(matches!(err, CoreError::SegmentNotFound { .. }));
    assert!(!early.is_doomed());
    early.delete(DB, TABLE, &[row(0, 0)]).unwrap();
    db.commit(&mut early).unwrap();
    assert_eq!(keys(&db, TABLE), (1..8).collect::<Vec<_>>());
}

#[test]
fn threaded_delete_and_compaction_never_lose_a_delete() {
    for round in 0..20u32 {
        let db = database(Config::new().block_capacity(4).segment_capacity(16));
        for i in 0..4 {
            import(&db, TABLE, i * 8, 8);
        }
        let victim = row(round % 4, round % 8);
        let victim_key = i64::from(round % 4) * 8 + i64::from(round % 8);
        let barrier = Barrier::new(2);

        let (deleted, compacted) = std::thread::scope(|s| {
            let deleter = s.spawn(|| {
                barrier.wait();
                db.transaction("delete", |txn| txn.delete(DB, TABLE, &[victim]))
            });
            let compactor = s.spawn(|| {
                barrier.wait();
                db.compact(DB, TABLE, SegmentSelection::All)
            });
            (deleter.join().unwrap(), compactor.join().unwrap())
        });

        if let Err(err) = &deleted {
            assert!(err.is_conflict(), "{err}");
            assert!(compacted.is_some());
        }
        let live = keys(&db, TABLE);
        assert_eq!(live.contains(&victim_key), deleted.is_err(), "round {round}");
        assert_eq!(live.len(), if deleted.is_ok() { 31 } else { 32 });
        assert_eq!(db.txn_manager().active_count(), 0);
    }
}
