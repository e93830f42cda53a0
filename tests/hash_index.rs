//! Integration tests for the non-unique hash index.
//!
//! The hash index is maintained incrementally by `VectraDB`, so every test
//! here goes through record operations and checks the index afterwards.

use std::collections::BTreeSet;

use vectradb::{
    ColumnDef, ColumnType, Config, IndexParams, IndexType, Predicate, TupleId, Value, VectraDB,
};
use tempfile::{tempdir, TempDir};

fn columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::nullable("category", ColumnType::String),
        ColumnDef::new("rank", ColumnType::Long),
        ColumnDef::new("v", ColumnType::FloatVector(2)),
    ]
}

fn row(category: Option<&str>, rank: i64) -> Vec<Option<Value>> {
    vec![
        category.map(Value::from),
        Some(Value::Long(rank)),
        Some(vec![rank as f32, 0.0].into()),
    ]
}

fn setup() -> (TempDir, VectraDB) {
    let dir = tempdir().unwrap();
    let db = VectraDB::open(dir.path(), &columns(), Config::default()).unwrap();
    db.create_index("by_category", IndexType::Hash, &["category"], &IndexParams::new())
        .unwrap();
    db.create_index("by_rank", IndexType::Hash, &["rank"], &IndexParams::new())
        .unwrap();
    (dir, db)
}

fn lookup(db: &VectraDB, index: &str, column: &str, values: Vec<Value>) -> BTreeSet<TupleId> {
    let index = db.index(index).unwrap();
    let tx = index.begin().unwrap();
    let ids = tx
        .filter(&Predicate::equals(column, values))
        .unwrap()
        .map(|m| m.unwrap().tuple_id)
        .collect();
    ids
}

#[test]
fn test_insert_update_delete_maintained() {
    let (_dir, db) = setup();

    let a = db.insert(row(Some("red"), 1)).unwrap();
    let b = db.insert(row(Some("red"), 2)).unwrap();
    let c = db.insert(row(Some("blue"), 1)).unwrap();

    assert_eq!(
        lookup(&db, "by_category", "category", vec!["red".into()]),
        BTreeSet::from([a, b])
    );
    assert_eq!(
        lookup(&db, "by_rank", "rank", vec![Value::Long(1)]),
        BTreeSet::from([a, c])
    );

    db.update(b, row(Some("blue"), 2)).unwrap();
    assert_eq!(
        lookup(&db, "by_category", "category", vec!["red".into()]),
        BTreeSet::from([a])
    );
    assert_eq!(
        lookup(&db, "by_category", "category", vec!["blue".into()]),
        BTreeSet::from([b, c])
    );

    db.delete(c).unwrap();
    assert_eq!(
        lookup(&db, "by_category", "category", vec!["blue".into()]),
        BTreeSet::from([b])
    );
    assert_eq!(
        lookup(&db, "by_rank", "rank", vec![Value::Long(1)]),
        BTreeSet::from([a])
    );

    assert!(!db.index("by_category").unwrap().is_dirty());
    assert!(!db.index("by_rank").unwrap().is_dirty());
    db.close().unwrap();
}

#[test]
fn test_null_values_not_indexed() {
    let (_dir, db) = setup();
    db.insert(row(None, 1)).unwrap();
    let named = db.insert(row(Some("x"), 2)).unwrap();

    db.rebuild_index("by_category").unwrap();
    assert_eq!(
        lookup(&db, "by_category", "category", vec!["x".into()]),
        BTreeSet::from([named])
    );
}

#[test]
fn test_multiple_lookup_values() {
    let (_dir, db) = setup();
    let ids: Vec<_> = (0..6)
        .map(|i| db.insert(row(Some(["a", "b", "c"][i % 3]), i as i64)).unwrap())
        .collect();

    let index = db.index("by_category").unwrap();
    let tx = index.begin().unwrap();
    let matches: Vec<_> = tx
        .filter(&Predicate::equals("category", vec!["a".into(), "c".into()]))
        .unwrap()
        .map(|m| m.unwrap())
        .collect();

    let for_a: BTreeSet<_> = matches
        .iter()
        .filter(|m| m.query_index == 0)
        .map(|m| m.tuple_id)
        .collect();
    let for_c: BTreeSet<_> = matches
        .iter()
        .filter(|m| m.query_index == 1)
        .map(|m| m.tuple_id)
        .collect();
    assert_eq!(for_a, BTreeSet::from([ids[0], ids[3]]));
    assert_eq!(for_c, BTreeSet::from([ids[2], ids[5]]));
}

#[test]
fn test_batch_insert_requires_rebuild() {
    let (_dir, db) = setup();
    let ids = db
        .insert_batch(vec![row(Some("a"), 1), row(Some("a"), 2)])
        .unwrap();

    let index = db.index("by_category").unwrap();
    assert!(index.is_dirty());
    let tx = index.begin().unwrap();
    assert!(tx
        .filter(&Predicate::equals("category", vec!["a".into()]))
        .err()
        .unwrap()
        .is_lifecycle());
    drop(tx);

    db.rebuild_index("by_category").unwrap();
    assert_eq!(
        lookup(&db, "by_category", "category", vec!["a".into()]),
        ids.into_iter().collect()
    );
}

#[test]
fn test_lookup_value_type_checked() {
    let (_dir, db) = setup();
    let index = db.index("by_rank").unwrap();
    let tx = index.begin().unwrap();
    let err = tx
        .filter(&Predicate::equals("rank", vec!["one".into()]))
        .err()
        .unwrap();
    assert!(err.is_type());
}

#[test]
fn test_hash_index_survives_reopen() {
    let dir = tempdir().unwrap();
    let id;
    {
        let db = VectraDB::open(dir.path(), &columns(), Config::default()).unwrap();
        db.create_index("by_rank", IndexType::Hash, &["rank"], &IndexParams::new())
            .unwrap();
        id = db.insert(row(Some("x"), 42)).unwrap();
        db.close().unwrap();
    }

    let db = VectraDB::open(dir.path(), &columns(), Config::default()).unwrap();
    assert_eq!(
        lookup(&db, "by_rank", "rank", vec![Value::Long(42)]),
        BTreeSet::from([id])
    );
    db.close().unwrap();
}
