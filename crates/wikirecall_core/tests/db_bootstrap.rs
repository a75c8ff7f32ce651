use rusqlite::Connection;
use wikirecall_core::db::migrations::latest_version;
use wikirecall_core::db::{open_db, open_db_in_memory, DbError};
use wikirecall_core::{Collection, SqliteCollection, StoreError};

#[test]
fn user_version_matches_latest_after_open() {
    let conn = open_db_in_memory().unwrap();
    let version: u32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, latest_version());
    assert!(latest_version() > 0);
}

#[test]
fn collection_file_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("collection.db");

    let mut store = SqliteCollection::open(&path).unwrap();
    let deck = store.deck_handle("Default").unwrap();
    drop(store);

    let mut reopened = SqliteCollection::open(&path).unwrap();
    assert_eq!(reopened.deck_handle("Default").unwrap(), deck);
}

#[test]
fn newer_schema_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("collection.db");

    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("PRAGMA user_version = 99;").unwrap();
    }

    let err = open_db(&path).unwrap_err();
    assert!(matches!(err, DbError::UnsupportedSchemaVersion { .. }));

    let err = SqliteCollection::open(&path).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Db(DbError::UnsupportedSchemaVersion { .. })
    ));
}
