use rusqlite::Connection;
use taskboard_core::{
    AdapterKind, Database, DbError, StoreConfig, StoreError, StoreStatus, Table, TaskDraft,
    APP_SCHEMA,
};

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1;",
        [name],
        |row| row.get::<_, i64>(0),
    )
    .unwrap()
        == 1
}

#[test]
fn fresh_sqlite_file_gets_declared_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskboard.db");

    let db = Database::open(&StoreConfig::sqlite_file(&path)).unwrap();
    assert_eq!(
        db.status(),
        StoreStatus::Ready {
            adapter: AdapterKind::SqliteFile
        }
    );
    drop(db);

    let conn = Connection::open(&path).unwrap();
    assert_eq!(schema_version(&conn), APP_SCHEMA.version);
    for table in Table::ALL {
        assert!(table_exists(&conn, table.as_str()), "missing {table}");
    }
}

#[test]
fn notes_table_declares_task_foreign_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskboard.db");
    drop(Database::open(&StoreConfig::sqlite_file(&path)).unwrap());

    let conn = Connection::open(&path).unwrap();
    let mut stmt = conn
        .prepare("SELECT \"table\", \"from\" FROM pragma_foreign_key_list('notes');")
        .unwrap();
    let keys = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(keys, vec![("tasks".to_string(), "task_id".to_string())]);
}

#[test]
fn reopening_sqlite_file_keeps_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskboard.db");

    let db = Database::open(&StoreConfig::sqlite_file(&path)).unwrap();
    let task = db
        .write(|| db.tasks().create(TaskDraft::new("persisted")))
        .unwrap();
    drop(db);

    let reopened = Database::open(&StoreConfig::sqlite_file(&path)).unwrap();
    let loaded = reopened.tasks().find(task.id()).unwrap();
    assert_eq!(loaded, task);
}

#[test]
fn sqlite_version_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = Database::open(&StoreConfig::sqlite_file(&path)).unwrap_err();
    match err {
        StoreError::Setup(DbError::SchemaVersionMismatch { found, expected }) => {
            assert_eq!(found, 999);
            assert_eq!(expected, APP_SCHEMA.version);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn sqlite_missing_table_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(&format!(
        "PRAGMA user_version = {};",
        APP_SCHEMA.version
    ))
    .unwrap();
    drop(conn);

    let err = Database::open(&StoreConfig::sqlite_file(&path)).unwrap_err();
    assert!(matches!(err, StoreError::Setup(DbError::MissingTable(_))));
}

#[test]
fn json_document_version_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, r#"{"version": 42, "tables": {}}"#).unwrap();

    let err = Database::open(&StoreConfig::memory_persisted(&path)).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Setup(DbError::SchemaVersionMismatch { found: 42, .. })
    ));
}

#[test]
fn memory_document_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    let db = Database::open(&StoreConfig::memory_persisted(&path)).unwrap();
    let task = db
        .write(|| db.tasks().create(TaskDraft::new("kept")))
        .unwrap();
    drop(db);

    let reopened = Database::open(&StoreConfig::memory_persisted(&path)).unwrap();
    assert_eq!(
        reopened.status(),
        StoreStatus::Ready {
            adapter: AdapterKind::MemoryPersisted
        }
    );
    assert_eq!(reopened.tasks().fetch_all().unwrap(), vec![task]);
}

#[test]
fn open_or_unavailable_degrades_on_setup_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, "not json").unwrap();

    let db = Database::open_or_unavailable(&StoreConfig::memory_persisted(&path));
    assert!(matches!(db.status(), StoreStatus::Unavailable { .. }));
    assert!(matches!(
        db.tasks().fetch_all(),
        Err(StoreError::Unavailable { .. })
    ));
}
