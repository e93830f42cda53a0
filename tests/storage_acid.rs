//! ACID and crash recovery integration tests for VectraDB.
//!
//! These tests verify that the storage layer provides the expected
//! durability and atomicity guarantees at the VectraDB level.
//!
//! # Crash Simulation
//!
//! We simulate a crash by dropping the `VectraDB` handle without calling
//! `close()`. Since redb durably commits data during `commit()` (not during
//! `close()`), dropping the handle simulates an ungraceful shutdown.
//!
//! redb uses shadow paging (not a WAL), so the database is always in a
//! consistent state: either the commit completed (data is present) or it
//! didn't (data is absent). There is never a half-committed state.

use vectradb::{ColumnDef, ColumnType, Config, IndexParams, IndexType, Predicate, Value, VectraDB};
use tempfile::tempdir;

fn columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("name", ColumnType::String),
        ColumnDef::nullable("feature", ColumnType::FloatVector(3)),
    ]
}

fn row(name: &str) -> Vec<Option<Value>> {
    vec![Some(name.into()), Some(vec![1.0, 2.0, 3.0].into())]
}

/// Helper: open a VectraDB in the given directory with default config.
fn open_db(path: &std::path::Path) -> VectraDB {
    VectraDB::open(path, &columns(), Config::default()).unwrap()
}

// ============================================================================
// Durability Tests
// ============================================================================

#[test]
fn test_committed_data_survives_normal_close() {
    // Basic durability: insert, close gracefully, reopen, verify.
    let dir = tempdir().unwrap();

    let db = open_db(dir.path());
    let id = db.insert(row("durable")).unwrap();
    db.close().unwrap();

    let db = open_db(dir.path());
    let retrieved = db.get(id).unwrap();
    assert!(retrieved.is_some(), "Data must survive a normal close");
    assert_eq!(retrieved.unwrap().value(0), Some(&Value::from("durable")));
    db.close().unwrap();
}

#[test]
fn test_committed_data_survives_crash() {
    // Crash durability: insert, DROP without close (simulates crash),
    // reopen, verify data is present.
    let dir = tempdir().unwrap();

    let id;
    {
        let db = open_db(dir.path());
        id = db.insert(row("crash-safe")).unwrap();
        // NO close() -- simulates crash (drop without flush)
    }

    let db = open_db(dir.path());
    let retrieved = db.get(id).unwrap();
    assert!(
        retrieved.is_some(),
        "Committed data must survive a crash (drop without close)"
    );
    assert_eq!(retrieved.unwrap().value(0), Some(&Value::from("crash-safe")));
    db.close().unwrap();
}

#[test]
fn test_bulk_data_survives_crash() {
    // Crash durability at scale: batch-insert 100 records, crash, verify
    // all 100 are present after recovery.
    let dir = tempdir().unwrap();

    let ids;
    {
        let db = open_db(dir.path());
        ids = db
            .insert_batch((0..100).map(|i| row(&format!("record-{}", i))).collect())
            .unwrap();
        // NO close() -- crash
    }

    let db = open_db(dir.path());
    assert_eq!(db.count().unwrap(), 100, "All 100 records must survive crash");

    for id in &ids {
        assert!(
            db.get(*id).unwrap().is_some(),
            "Record {} must be present after crash",
            id
        );
    }
    db.close().unwrap();
}

#[test]
fn test_multiple_crash_cycles() {
    // Multiple crash/recovery cycles should not cause corruption.
    let dir = tempdir().unwrap();

    // Cycle 1: insert and crash
    let id1;
    {
        let db = open_db(dir.path());
        id1 = db.insert(row("cycle-1")).unwrap();
    }

    // Cycle 2: add more and crash again
    let id2;
    {
        let db = open_db(dir.path());

        // Verify cycle 1 data survived
        assert!(db.get(id1).unwrap().is_some());

        id2 = db.insert(row("cycle-2")).unwrap();
    }

    // Cycle 3: verify both survived
    let db = open_db(dir.path());
    assert!(db.get(id1).unwrap().is_some());
    assert!(db.get(id2).unwrap().is_some());
    assert_ne!(id1, id2);
    assert_eq!(db.count().unwrap(), 2);
    db.close().unwrap();
}

// ============================================================================
// Atomicity Tests
// ============================================================================

#[test]
fn test_invalid_batch_is_not_partially_applied() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    let mut rows: Vec<_> = (0..10).map(|i| row(&format!("ok-{}", i))).collect();
    // Wrong dimension in the last row
    rows.push(vec![Some("bad".into()), Some(vec![1.0].into())]);

    assert!(db.insert_batch(rows).unwrap_err().is_validation());
    assert_eq!(db.count().unwrap(), 0, "A failed batch must leave no records");
    db.close().unwrap();
}

#[test]
fn test_index_state_survives_crash() {
    // The hash index is updated in its own committed transaction per change,
    // so its contents survive a crash just like entity records.
    let dir = tempdir().unwrap();

    let id;
    {
        let db = open_db(dir.path());
        db.create_index("names", IndexType::Hash, &["name"], &IndexParams::new())
            .unwrap();
        id = db.insert(row("indexed")).unwrap();
    }

    let db = open_db(dir.path());
    let index = db.index("names").unwrap();
    assert!(!index.is_dirty());

    let tx = index.begin().unwrap();
    let found: Vec<_> = tx
        .filter(&Predicate::equals("name", vec!["indexed".into()]))
        .unwrap()
        .map(|m| m.unwrap().tuple_id)
        .collect();
    assert_eq!(found, vec![id]);
    drop(tx);
    db.close().unwrap();
}
