//! Unit tests for the SQLite store.

use super::*;
use crate::test_support::SAMPLE_SCHEMA;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use rstest::{fixture, rstest};
use tempfile::TempDir;
use uls_core::{
    ImportMode, RecordTypeCounts, RecordTypeOutcome, RecordTypeReport, RunStatus, TypeCode,
};

#[fixture]
fn store() -> Store {
    Store::open_in_memory().expect("open in-memory store")
}

fn table_exists(connection: &Connection, name: &str) -> bool {
    connection
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .expect("query sqlite_master")
        == 1
}

fn index_names(connection: &Connection, table: &str) -> Vec<String> {
    let mut statement = connection
        .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 ORDER BY name")
        .expect("prepare index query");
    statement
        .query_map([table], |row| row.get::<_, String>(0))
        .expect("query indexes")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect indexes")
}

#[rstest]
fn migrations_record_the_store_version(store: Store) {
    let version: i64 = store
        .connection()
        .query_row("SELECT version FROM uls_store_version", [], |row| row.get(0))
        .expect("read version");
    assert_eq!(version, STORE_VERSION);
}

#[rstest]
fn reopening_a_store_keeps_its_contents() {
    let dir = TempDir::new().expect("create temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().join("nested/uls.db")).expect("UTF-8 path");
    {
        let mut store = Store::open(&path, &StoreOptions::default()).expect("create store");
        store.init_schema(SAMPLE_SCHEMA).expect("install schema");
    }
    let reopened = Store::open(&path, &StoreOptions::default()).expect("reopen store");
    let registry = reopened.registry().expect("load registry");
    assert_eq!(registry.len(), 3);

    let read_only = Store::open_read_only(&path).expect("open read-only");
    assert!(read_only.registry().is_ok());
}

#[rstest]
fn rejects_unknown_store_versions() {
    let dir = TempDir::new().expect("create temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().join("uls.db")).expect("UTF-8 path");
    {
        let store = Store::open(&path, &StoreOptions::default()).expect("create store");
        store
            .connection()
            .execute("UPDATE uls_store_version SET version = 99", [])
            .expect("tamper with version");
    }
    let err = Store::open(&path, &StoreOptions::default()).expect_err("mismatch must fail");
    assert!(
        matches!(err, StoreError::VersionMismatch { expected: STORE_VERSION, found: 99 }),
        "{err:?}"
    );
}

#[rstest]
fn init_schema_creates_tables_and_indexes(mut store: Store) {
    let registry = store.init_schema(SAMPLE_SCHEMA).expect("install schema");
    for schema in registry.iter() {
        assert!(table_exists(store.connection(), schema.table_name()));
    }
    let header_indexes = index_names(store.connection(), "PUBACC_HD");
    assert_eq!(
        header_indexes,
        vec!["ix_PUBACC_HD_call_sign".to_owned(), "ix_PUBACC_HD_system_id".to_owned()],
        "key-less types get a plain identifier index"
    );
    let entity_indexes = index_names(store.connection(), "PUBACC_EN");
    assert!(entity_indexes.contains(&"ux_PUBACC_EN_key".to_owned()));
    assert!(entity_indexes.contains(&"ix_PUBACC_EN_entity_name".to_owned()));
    assert!(entity_indexes.contains(&"ix_PUBACC_EN_unique_system_identifier".to_owned()));
}

#[rstest]
fn init_schema_is_repeatable(mut store: Store) {
    let first = store.init_schema(SAMPLE_SCHEMA).expect("first install");
    let second = store.init_schema(SAMPLE_SCHEMA).expect("second install");
    assert_eq!(first, second);
    assert_eq!(store.registry().expect("stored registry"), first);
}

const KEYED_HEADER: &str =
    "create table PUBACC_HD (system_id int, call_sign char(10), status char(1), primary key (system_id))";
const REKEYED_HEADER: &str = "create table PUBACC_HD (system_id int, call_sign char(10), status char(1), \
     primary key (system_id, call_sign))";
const UNKEYED_HEADER: &str = "create table PUBACC_HD (system_id int, call_sign char(10), status char(1))";

#[rstest]
fn reinstalling_with_a_new_key_rebuilds_the_key_index(mut store: Store) {
    store.init_schema(KEYED_HEADER).expect("first install");
    store.init_schema(REKEYED_HEADER).expect("second install");

    let columns = tables::index_columns(store.connection(), "ux_PUBACC_HD_key").expect("index columns");
    assert_eq!(columns, vec!["system_id".to_owned(), "call_sign".to_owned()]);
    let inserted = store
        .connection()
        .execute(
            "INSERT INTO PUBACC_HD (system_id, call_sign, status) VALUES (1, 'W1AW', 'A')
             ON CONFLICT (system_id, call_sign) DO NOTHING",
            [],
        )
        .expect("conflict target matches the new key");
    assert_eq!(inserted, 1);
}

#[rstest]
fn dropping_a_declared_key_removes_the_unique_index(mut store: Store) {
    store.init_schema(KEYED_HEADER).expect("first install");
    store.init_schema(UNKEYED_HEADER).expect("second install");

    let indexes = index_names(store.connection(), "PUBACC_HD");
    assert!(!indexes.contains(&"ux_PUBACC_HD_key".to_owned()), "{indexes:?}");
    store
        .connection()
        .execute_batch(
            "INSERT INTO PUBACC_HD VALUES (1, 'W1AW', 'A');
             INSERT INTO PUBACC_HD VALUES (1, 'W1AW', 'E');",
        )
        .expect("rows sharing an identifier are allowed");
}

#[rstest]
fn invalid_documents_leave_the_store_untouched(mut store: Store) {
    let err = store
        .init_schema("create table PUBACC_HD (a int)\ngo\ncreate table HD (b int)\ngo\n")
        .expect_err("duplicate type must fail");
    assert!(matches!(err, StoreError::Schema(_)), "{err:?}");
    assert!(!table_exists(store.connection(), "PUBACC_HD"));
    assert!(matches!(store.registry(), Err(StoreError::SchemaNotInitialised)));
}

#[rstest]
fn drifted_tables_are_reported(mut store: Store) {
    store
        .connection()
        .execute("CREATE TABLE PUBACC_HD (system_id INTEGER, call_sign TEXT)", [])
        .expect("create drifted table");
    let err = store.init_schema(SAMPLE_SCHEMA).expect_err("layout mismatch");
    match err {
        StoreError::TableLayoutMismatch { table, found, .. } => {
            assert_eq!(table, "PUBACC_HD");
            assert_eq!(found, "system_id, call_sign");
        }
        other => panic!("expected layout mismatch, got {other:?}"),
    }
}

#[rstest]
fn maintenance_commands_succeed(mut store: Store) {
    store.init_schema(SAMPLE_SCHEMA).expect("install schema");
    store.analyze().expect("analyze");
    store.vacuum().expect("vacuum");
}

#[rstest]
fn run_log_round_trips_reports(store: Store) {
    let started = Utc
        .with_ymd_and_hms(2024, 3, 1, 6, 0, 0)
        .single()
        .expect("valid timestamp");
    let connection = store.connection();
    let first = runs::begin_run(connection, ImportMode::Full, &["l_amat.zip".into()], started)
        .expect("begin first run");
    let report = RecordTypeReport {
        type_code: TypeCode::new("HD"),
        source_file: "HD.dat".into(),
        table_name: Some("PUBACC_HD".into()),
        outcome: RecordTypeOutcome::Committed,
        counts: RecordTypeCounts {
            read: 3,
            loaded: 2,
            rejected: 1,
            ..RecordTypeCounts::default()
        },
        error: None,
    };
    runs::record_type_report(connection, first, 0, &report).expect("record report");
    runs::finish_run(
        connection,
        first,
        RunStatus::Succeeded,
        started + ChronoDuration::seconds(5),
        None,
    )
    .expect("finish run");
    let second = runs::begin_run(connection, ImportMode::Daily, &["l_am_mon.zip".into()], started)
        .expect("begin second run");

    let loaded = load_runs(connection, None).expect("load runs");
    let ids: Vec<_> = loaded.iter().map(|run| run.id).collect();
    assert_eq!(ids, vec![second, first], "most recent first");

    let finished = loaded.get(1).expect("first run");
    assert_eq!(finished.status, RunStatus::Succeeded);
    assert_eq!(finished.started_at, started);
    assert_eq!(finished.sources, vec!["l_amat.zip".to_owned()]);
    assert_eq!(finished.record_types, vec![report]);

    let running = loaded.first().expect("second run");
    assert_eq!(running.status, RunStatus::Running);
    assert!(running.finished_at.is_none());

    assert_eq!(load_runs(connection, Some(1)).expect("limited").len(), 1);
}
