use pretty_assertions::assert_eq;
use tempfile::{tempdir, TempDir};
use vaultbase_storage::{
    ColumnKind, ColumnSpec, RecordStore, SpecialColumn, SpecialType, StoreConfig, StoreError, Value,
    METADATA_TABLE,
};

fn open() -> (TempDir, RecordStore) {
    let dir = tempdir().expect("tempdir");
    let mut config = StoreConfig::new(dir.path().join("database.db"), dir.path().join("db_key.key"));
    config.work_dir = Some(dir.path().to_path_buf());
    let store = RecordStore::open(config).expect("open store");
    (dir, store)
}

#[test]
fn rename_keeps_special_type_and_values() {
    let (_dir, mut store) = open();
    store
        .create_table(
            "T",
            &[ColumnSpec::special("d", SpecialColumn::new(SpecialType::Date))],
        )
        .expect("create");
    let id = store
        .insert_record("T", &[("d", Value::from("2024-01-15"))])
        .expect("insert");

    store.rename_column("T", "d", "d2").expect("rename");

    assert_eq!(
        store.special_type("T", "d2").expect("lookup"),
        Some(SpecialColumn::new(SpecialType::Date))
    );
    assert_eq!(store.special_type("T", "d").expect("lookup"), None);
    let row = store.get_record("T", id).expect("get").expect("row");
    assert_eq!(row.get("d2"), Some(&Value::from("2024-01-15")));
    assert_eq!(row.get("d"), None);
}

#[test]
fn list_tables_hides_internal_tables() {
    let (_dir, mut store) = open();
    store.create_table("Clients", &[]).expect("create");
    store.create_table("x_sys_notes", &[]).expect("create");

    let mut tables = store.list_tables().expect("list");
    tables.sort();
    assert_eq!(tables, vec!["Clients".to_string(), "x_sys_notes".to_string()]);
    assert!(!tables.iter().any(|t| t == METADATA_TABLE));
}

#[test]
fn relation_and_file_columns_resolve_their_kinds() {
    let (_dir, mut store) = open();
    store.create_table("Clients", &[ColumnSpec::text("name")]).expect("create");
    store
        .create_table(
            "Invoices",
            &[
                ColumnSpec::special("client", SpecialColumn::with_extra(SpecialType::Relation, "Clients")),
                ColumnSpec::text("scan"),
            ],
        )
        .expect("create");
    store
        .set_special_type("Invoices", "scan", &SpecialColumn::new(SpecialType::File))
        .expect("set special");

    let kinds: Vec<ColumnKind> = store
        .column_kinds("Invoices")
        .expect("kinds")
        .into_iter()
        .map(|(_, kind)| kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            ColumnKind::Id,
            ColumnKind::Relation {
                table: "Clients".to_string()
            },
            ColumnKind::File,
        ]
    );
    assert_eq!(
        store
            .columns_with_special("invoices", SpecialType::File)
            .expect("file columns"),
        vec!["scan".to_string()]
    );
}

#[test]
fn drop_table_removes_its_metadata_and_journal_entries() {
    let (_dir, mut store) = open();
    store
        .create_table(
            "T",
            &[ColumnSpec::special("d", SpecialColumn::new(SpecialType::Date))],
        )
        .expect("create");
    store.insert_record("T", &[("d", Value::from("2024-01-15"))]).expect("insert");
    assert!(store.can_undo());

    store.drop_table("T").expect("drop");
    assert!(!store.can_undo());
    assert!(matches!(store.get_records("T", None), Err(StoreError::TableNotFound(_))));

    // A table re-created under the same name starts without the old metadata.
    store.create_table("T", &[ColumnSpec::text("d")]).expect("re-create");
    assert_eq!(store.special_type("T", "d").expect("lookup"), None);
}

#[test]
fn add_column_appends_after_existing_columns() {
    let (_dir, mut store) = open();
    store.create_table("T", &[ColumnSpec::text("a")]).expect("create");
    let id = store.insert_record("T", &[("a", Value::from("x"))]).expect("insert");

    store.add_column("T", &ColumnSpec::real("b")).expect("add");
    let names: Vec<String> = store
        .get_columns("T")
        .expect("columns")
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["id", "a", "b"]);

    let row = store.get_record("T", id).expect("get").expect("row");
    assert_eq!(row.get("b"), Some(&Value::Null));

    assert!(matches!(
        store.add_column("T", &ColumnSpec::text("A")),
        Err(StoreError::ColumnExists { .. })
    ));
}

#[test]
fn bad_identifiers_and_duplicates_are_rejected() {
    let (_dir, mut store) = open();
    for name in ["", " padded", "quo\"te", "sqlite_master", "_sys_columns"] {
        assert!(
            matches!(
                store.create_table(name, &[]),
                Err(StoreError::InvalidIdentifier { .. })
            ),
            "{name:?} should be rejected"
        );
    }
    assert!(matches!(
        store.create_table("T", &[ColumnSpec::text("id")]),
        Err(StoreError::InvalidIdentifier { .. })
    ));
    assert!(matches!(
        store.create_table("T", &[ColumnSpec::text("a"), ColumnSpec::text("A")]),
        Err(StoreError::ColumnExists { .. })
    ));

    store.create_table("T", &[ColumnSpec::text("a")]).expect("create");
    assert!(matches!(store.create_table("t", &[]), Err(StoreError::TableExists(_))));
    assert!(matches!(
        store.rename_column("T", "missing", "b"),
        Err(StoreError::ColumnNotFound { .. })
    ));
    assert!(matches!(store.drop_table("Nope"), Err(StoreError::TableNotFound(_))));
}
