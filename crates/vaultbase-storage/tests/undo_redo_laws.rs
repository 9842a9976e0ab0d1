use pretty_assertions::assert_eq;
use tempfile::{tempdir, TempDir};
use vaultbase_storage::{ColumnSpec, Record, RecordStore, StoreConfig, StoreError, Value};

fn open() -> (TempDir, RecordStore) {
    let dir = tempdir().expect("tempdir");
    let mut config = StoreConfig::new(dir.path().join("database.db"), dir.path().join("db_key.key"));
    config.work_dir = Some(dir.path().to_path_buf());
    let mut store = RecordStore::open(config).expect("open store");
    store
        .create_table("T", &[ColumnSpec::text("name"), ColumnSpec::real("qty")])
        .expect("create table");
    (dir, store)
}

fn insert(store: &mut RecordStore, name: &str, qty: f64) -> i64 {
    store
        .insert_record("T", &[("name", Value::from(name)), ("qty", Value::from(qty))])
        .expect("insert")
}

fn rows(store: &RecordStore) -> Vec<Record> {
    store.get_records("T", None).expect("records")
}

#[test]
fn undoing_every_mutation_restores_the_start_state() {
    let (_dir, mut store) = open();
    let a = insert(&mut store, "a", 1.0);
    let b = insert(&mut store, "b", 2.0);
    let start = rows(&store);

    insert(&mut store, "c", 3.0);
    store
        .update_record("T", a, &[("qty", Value::from(10.0)), ("name", Value::Null)])
        .expect("update");
    store.delete_record("T", b).expect("delete");
    assert_ne!(rows(&store), start);

    for _ in 0..3 {
        store.undo().expect("undo");
    }
    assert_eq!(rows(&store), start);
}

#[test]
fn redo_reproduces_the_state_before_each_undo() {
    let (_dir, mut store) = open();
    let keep = insert(&mut store, "keep", 1.0);

    // insert
    insert(&mut store, "new", 2.0);
    let forward = rows(&store);
    store.undo().expect("undo insert");
    assert_eq!(rows(&store).len(), 1);
    store.redo().expect("redo insert");
    assert_eq!(rows(&store), forward);

    // update
    store
        .update_record("T", keep, &[("qty", Value::from(5.0))])
        .expect("update");
    let forward = rows(&store);
    store.undo().expect("undo update");
    store.redo().expect("redo update");
    assert_eq!(rows(&store), forward);

    // delete
    store.delete_record("T", keep).expect("delete");
    let forward = rows(&store);
    store.undo().expect("undo delete");
    assert!(store.get_record("T", keep).expect("get").is_some());
    store.redo().expect("redo delete");
    assert_eq!(rows(&store), forward);
}

#[test]
fn journal_keeps_only_the_last_three_mutations() {
    let (_dir, mut store) = open();
    for n in 0..4 {
        insert(&mut store, "row", f64::from(n));
    }

    let mut undone = 0;
    let err = loop {
        match store.undo() {
            Ok(_) => undone += 1,
            Err(err) => break err,
        }
    };
    assert_eq!(undone, 3);
    assert!(matches!(err, StoreError::NothingToUndo));
    assert_eq!(err.to_string(), "nothing to undo");
    assert_eq!(rows(&store).len(), 1);
}

#[test]
fn new_mutation_clears_redo() {
    let (_dir, mut store) = open();
    insert(&mut store, "A", 1.0);
    store.undo().expect("undo A");
    assert!(store.can_redo());

    insert(&mut store, "B", 2.0);
    assert!(!store.can_redo());
    assert!(matches!(store.redo(), Err(StoreError::NothingToRedo)));

    let names: Vec<_> = rows(&store)
        .into_iter()
        .filter_map(|r| r.get("name").cloned())
        .collect();
    assert_eq!(names, vec![Value::from("B")]);
}

#[test]
fn missing_rows_are_reported_and_not_journaled() {
    let (_dir, mut store) = open();
    assert!(matches!(
        store.update_record("T", 99, &[("qty", Value::from(1.0))]),
        Err(StoreError::RecordNotFound { id: 99, .. })
    ));
    assert!(matches!(
        store.delete_record("T", 99),
        Err(StoreError::RecordNotFound { id: 99, .. })
    ));
    assert!(matches!(
        store.insert_record("T", &[("colour", Value::from("red"))]),
        Err(StoreError::ColumnNotFound { .. })
    ));
    assert!(!store.can_undo());
}

#[test]
fn undo_of_delete_follows_a_column_rename() {
    let (_dir, mut store) = open();
    let id = insert(&mut store, "x", 4.0);
    store.delete_record("T", id).expect("delete");
    store.rename_column("T", "qty", "quantity").expect("rename");

    store.undo().expect("undo delete");
    let row = store.get_record("T", id).expect("get").expect("row restored");
    assert_eq!(row.get("quantity"), Some(&Value::Real(4.0)));
    assert_eq!(row.get("name"), Some(&Value::from("x")));
}
