//! Unit tests for the import engine.

use super::*;
use crate::store::{Store, load_runs};
use crate::test_support::{
    SAMPLE_SCHEMA, corrupt_archive_entry, write_record_directory, write_zip_archive,
};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    store: Store,
    registry: SchemaRegistry,
}

impl Harness {
    fn archive(&self, name: &str, entries: &[(&str, &str)]) -> Utf8PathBuf {
        let path = self.dir.path().join(name);
        write_zip_archive(&path, entries).expect("write archive");
        Utf8PathBuf::from_path_buf(path).expect("UTF-8 path")
    }

    fn run(&mut self, source: &Utf8Path, options: &ImportOptions) -> Result<ImportRun, ImportError> {
        ImportEngine::new(self.store.connection_mut(), &self.registry).run(source, options)
    }

    fn apply(&mut self, source: &Utf8Path, options: &ImportOptions) -> ImportRun {
        self.run(source, options).expect("import runs")
    }

    fn rows(&self, sql: &str) -> Vec<Vec<String>> {
        let connection = self.store.connection();
        let mut statement = connection.prepare(sql).expect("prepare query");
        let width = statement.column_count();
        statement
            .query_map([], |row| {
                (0..width)
                    .map(|index| {
                        row.get::<_, Option<String>>(index)
                            .or_else(|_| row.get::<_, i64>(index).map(|value| Some(value.to_string())))
                            .map(Option::unwrap_or_default)
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .expect("run query")
            .collect::<Result<Vec<_>, _>>()
            .expect("collect rows")
    }

    fn headers(&self) -> Vec<Vec<String>> {
        self.rows("SELECT system_id, call_sign, status FROM PUBACC_HD ORDER BY system_id")
    }

    fn count(&self, table: &str) -> i64 {
        self.store
            .connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .expect("count rows")
    }
}

const HISTORY_SCHEMA: &str = "
create table dbo.PUBACC_HS
(
      record_type               char(2)        not null,
      unique_system_identifier  numeric(9,0)   not null,
      callsign                  char(10)       null,
      log_date                  char(10)       null,
      code                      char(6)        null
)
go
";

fn harness_with(document: &str) -> Harness {
    let mut store = Store::open_in_memory().expect("open store");
    let registry = store.init_schema(document).expect("install schema");
    Harness {
        dir: TempDir::new().expect("create temp dir"),
        store,
        registry,
    }
}

#[fixture]
fn harness() -> Harness {
    harness_with(SAMPLE_SCHEMA)
}

#[fixture]
fn history() -> Harness {
    harness_with(&format!("{SAMPLE_SCHEMA}{HISTORY_SCHEMA}"))
}

fn row(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

fn report<'r>(run: &'r ImportRun, code: &str) -> &'r RecordTypeReport {
    run.report(&TypeCode::new(code)).expect("record type reported")
}

#[rstest]
fn full_import_rejects_overlong_rows(mut harness: Harness) {
    let archive = harness.archive(
        "l_amat.zip",
        &[(
            "HD.dat",
            "100|W1AW|ACTIVE\n101|K2ABC|ACTIVE\n102|N3XYZ|ACTIVE|extra\n",
        )],
    );
    let run = harness.apply(&archive, &ImportOptions::full());

    let header = report(&run, "HD");
    assert_eq!(header.counts.read, 3);
    assert_eq!(header.counts.loaded, 2);
    assert_eq!(header.counts.rejected, 1);
    assert!(header.counts.reconciles());
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(harness.count("PUBACC_HD"), 2);
}

#[rstest]
fn daily_replace_overwrites_and_is_idempotent(mut harness: Harness) {
    let snapshot = harness.archive("l_amat.zip", &[("HD.dat", "100|W1AW|PENDING\n101|K2ABC|ACTIVE\n")]);
    harness.apply(&snapshot, &ImportOptions::full());

    let daily = harness.archive("l_am_mon.zip", &[("HD.dat", "100|W1AW|ACTIVE\n")]);
    let first = harness.apply(&daily, &ImportOptions::daily(true));
    assert_eq!(first.status, RunStatus::Succeeded);
    let after_once = harness.headers();
    assert_eq!(
        after_once,
        vec![row(&["100", "W1AW", "ACTIVE"]), row(&["101", "K2ABC", "ACTIVE"])]
    );

    harness.apply(&daily, &ImportOptions::daily(true));
    assert_eq!(harness.headers(), after_once);
}

#[rstest]
fn daily_without_replace_keeps_existing_keys(mut harness: Harness) {
    let snapshot = harness.archive("l_amat.zip", &[("HD.dat", "100|W1AW|PENDING\n")]);
    harness.apply(&snapshot, &ImportOptions::full());

    let daily = harness.archive("l_am_tue.zip", &[("HD.dat", "100|W1AW|ACTIVE\n101|K2ABC|ACTIVE\n")]);
    let run = harness.apply(&daily, &ImportOptions::daily(false));

    let header = report(&run, "HD");
    assert_eq!((header.counts.loaded, header.counts.kept), (1, 1));
    assert!(header.counts.reconciles());
    assert_eq!(
        harness.headers(),
        vec![row(&["100", "W1AW", "PENDING"]), row(&["101", "K2ABC", "ACTIVE"])]
    );
}

#[rstest]
fn replace_overrides_apply_per_record_type(mut harness: Harness) {
    let snapshot = harness.archive(
        "l_amat.zip",
        &[
            ("HD.dat", "100|W1AW|PENDING\n"),
            ("EN.dat", "EN|100|L|OLD NAME|0001\n"),
        ],
    );
    harness.apply(&snapshot, &ImportOptions::full());

    let daily = harness.archive(
        "l_am_wed.zip",
        &[
            ("HD.dat", "100|W1AW|ACTIVE\n"),
            ("EN.dat", "EN|100|L|NEW NAME|0001\n"),
        ],
    );
    let policy = ReplacePolicy::replace_all().with_override(TypeCode::new("EN"), false);
    harness.apply(&daily, &ImportOptions::daily(true).with_replace_policy(policy));

    assert_eq!(harness.headers(), vec![row(&["100", "W1AW", "ACTIVE"])]);
    assert_eq!(
        harness.rows("SELECT entity_name FROM PUBACC_EN"),
        vec![row(&["OLD NAME"])]
    );
}

#[rstest]
fn full_import_leaves_no_residue(mut harness: Harness) {
    let first = harness.archive("week1.zip", &[("HD.dat", "100|W1AW|ACTIVE\n101|K2ABC|ACTIVE\n")]);
    harness.apply(&first, &ImportOptions::full());
    let second = harness.archive("week2.zip", &[("HD.dat", "102|N3XYZ|ACTIVE\n")]);
    harness.apply(&second, &ImportOptions::full());

    assert_eq!(harness.headers(), vec![row(&["102", "N3XYZ", "ACTIVE"])]);
}

#[rstest]
fn failing_record_type_yields_partial_run(mut harness: Harness) {
    let seed = harness.archive("seed.zip", &[("EN.dat", "EN|100|L|ARRL|0001\n")]);
    harness.apply(&seed, &ImportOptions::full());
    harness
        .store
        .connection()
        .execute_batch(
            "CREATE TRIGGER refuse_entities BEFORE INSERT ON PUBACC_EN
             BEGIN SELECT RAISE(ABORT, 'entity load refused'); END;",
        )
        .expect("install trigger");

    let archive = harness.archive(
        "l_amat.zip",
        &[
            ("EN.dat", "EN|200|L|NEW CLUB|0002\n"),
            ("HD.dat", "200|W2NEW|ACTIVE\n"),
        ],
    );
    let run = harness.apply(&archive, &ImportOptions::full());

    assert_eq!(run.status, RunStatus::Partial);
    let entity = report(&run, "EN");
    assert_eq!(entity.outcome, RecordTypeOutcome::RolledBack);
    assert_eq!(entity.counts.rejected, entity.counts.read);
    assert!(entity.error.as_deref().is_some_and(|error| error.contains("refused")));
    assert_eq!(report(&run, "HD").outcome, RecordTypeOutcome::Committed);
    assert_eq!(
        run.stale_record_types().collect::<Vec<_>>(),
        vec![&TypeCode::new("EN")]
    );

    assert_eq!(
        harness.rows("SELECT unique_system_identifier, entity_name FROM PUBACC_EN"),
        vec![row(&["100", "ARRL"])],
        "rolled-back type keeps its previous contents"
    );
    assert_eq!(harness.headers(), vec![row(&["200", "W2NEW", "ACTIVE"])]);
}

#[rstest]
fn run_fails_when_nothing_commits(mut harness: Harness) {
    harness
        .store
        .connection()
        .execute_batch(
            "CREATE TRIGGER refuse_headers BEFORE INSERT ON PUBACC_HD
             BEGIN SELECT RAISE(ABORT, 'header load refused'); END;",
        )
        .expect("install trigger");
    let archive = harness.archive("l_amat.zip", &[("HD.dat", "100|W1AW|ACTIVE\n")]);
    let run = harness.apply(&archive, &ImportOptions::full());
    assert_eq!(run.status, RunStatus::Failed);
}

#[rstest]
fn unrecognized_record_types_are_counted_and_skipped(mut harness: Harness) {
    let archive = harness.archive(
        "l_amat.zip",
        &[
            ("HD.dat", "100|W1AW|ACTIVE\n"),
            ("XX.dat", "XX|1|mystery\nXX|2|mystery\n"),
        ],
    );
    let run = harness.apply(&archive, &ImportOptions::full());

    let unknown = report(&run, "XX");
    assert_eq!(unknown.outcome, RecordTypeOutcome::Unrecognized);
    assert_eq!(unknown.counts.unrecognized, 2);
    assert!(unknown.counts.reconciles());
    assert!(unknown.table_name.is_none());
    assert_eq!(run.status, RunStatus::Succeeded);

    let tables: i64 = harness
        .store
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name IN ('XX', 'PUBACC_XX')",
            [],
            |row| row.get(0),
        )
        .expect("inspect schema");
    assert_eq!(tables, 0);
}

#[rstest]
fn corrupt_entries_roll_back_only_their_type(mut harness: Harness) {
    let seed = harness.archive("seed.zip", &[("HD.dat", "100|W1AW|ACTIVE\n")]);
    harness.apply(&seed, &ImportOptions::full());

    let archive = harness.archive(
        "damaged.zip",
        &[
            ("EN.dat", "EN|100|L|ARRL|0001\n"),
            ("HD.dat", "200|Kdamaged|ACTIVE\n201|W9OK|ACTIVE\n"),
        ],
    );
    corrupt_archive_entry(archive.as_std_path(), "Kdamaged").expect("damage archive");
    let run = harness.apply(&archive, &ImportOptions::full());

    assert_eq!(run.status, RunStatus::Partial);
    let header = report(&run, "HD");
    assert_eq!(header.outcome, RecordTypeOutcome::RolledBack);
    assert!(header.counts.reconciles());
    assert_eq!(report(&run, "EN").outcome, RecordTypeOutcome::Committed);
    assert_eq!(harness.headers(), vec![row(&["100", "W1AW", "ACTIVE"])]);
}

#[rstest]
#[case(InvalidFieldPolicy::LoadWithNull, 1, 0)]
#[case(InvalidFieldPolicy::RejectRecord, 0, 1)]
fn invalid_fields_follow_the_policy(
    mut harness: Harness,
    #[case] policy: InvalidFieldPolicy,
    #[case] loaded: u64,
    #[case] rejected: u64,
) {
    let archive = harness.archive("l_amat.zip", &[("AM.dat", "AM|100|W1AW|E|13/45/2020\n")]);
    let run = harness.apply(
        &archive,
        &ImportOptions::full().with_invalid_field_policy(policy),
    );
    let amateur = report(&run, "AM");
    assert_eq!(amateur.counts.loaded, loaded);
    assert_eq!(amateur.counts.loaded_with_warnings, loaded);
    assert_eq!(amateur.counts.rejected, rejected);
    assert_eq!(run.status, RunStatus::Succeeded);
    if loaded == 1 {
        assert_eq!(
            harness.rows("SELECT call_sign, grant_date FROM PUBACC_AM"),
            vec![row(&["W1AW", ""])]
        );
    }
}

#[rstest]
fn dates_are_stored_in_iso_format(mut harness: Harness) {
    let archive = harness.archive("l_amat.zip", &[("AM.dat", "AM|100|W1AW|E|03/07/2019\n")]);
    harness.apply(&archive, &ImportOptions::full());
    assert_eq!(
        harness.rows("SELECT grant_date FROM PUBACC_AM"),
        vec![row(&["2019-03-07"])]
    );
}

#[rstest]
fn unpacked_directories_import_like_archives(mut harness: Harness) {
    let dir = harness.dir.path().join("unpacked");
    write_record_directory(&dir, &[("HD.dat", "100|W1AW|ACTIVE\r\n\r\n101|K2ABC|ACTIVE\r\n")])
        .expect("write directory");
    let source = Utf8PathBuf::from_path_buf(dir).expect("UTF-8 path");
    let run = harness.apply(&source, &ImportOptions::full());
    assert_eq!(report(&run, "HD").counts.loaded, 2);
}

#[rstest]
fn unreadable_archives_record_a_failed_run(mut harness: Harness) {
    let missing = Utf8PathBuf::from_path_buf(harness.dir.path().join("absent.zip"))
        .expect("UTF-8 path");
    let err = harness
        .run(&missing, &ImportOptions::full())
        .expect_err("missing archive must fail");
    let run_id = match err {
        ImportError::Archive { run_id, .. } => run_id,
        other => panic!("expected archive error, got {other:?}"),
    };

    let runs = load_runs(harness.store.connection(), None).expect("load runs");
    let recorded = runs.first().expect("run recorded");
    assert_eq!(recorded.id, run_id);
    assert_eq!(recorded.status, RunStatus::Failed);
    assert!(recorded.record_types.is_empty());
    assert!(recorded.error.is_some());
}

#[rstest]
fn persisted_runs_match_returned_runs(mut harness: Harness) {
    let archive = harness.archive(
        "l_amat.zip",
        &[("HD.dat", "100|W1AW|ACTIVE\n"), ("XX.dat", "XX|1\n")],
    );
    let run = harness.apply(&archive, &ImportOptions::full());

    let runs = load_runs(harness.store.connection(), Some(1)).expect("load runs");
    let stored = runs.first().expect("run stored");
    assert_eq!(stored.id, run.id);
    assert_eq!(stored.mode, ImportMode::Full);
    assert_eq!(stored.status, run.status);
    assert_eq!(stored.sources, run.sources);
    assert_eq!(stored.record_types, run.record_types);
    assert!(stored.finished_at.is_some());
}

#[rstest]
fn keyless_snapshots_keep_every_row(#[from(history)] mut harness: Harness) {
    let archive = harness.archive(
        "l_amat.zip",
        &[(
            "HS.dat",
            "HS|100|W1AW|01/02/2020|LIISS\nHS|100|W1AW|03/04/2021|LIREN\nHS|100|W1AW|05/06/2022|LIMOD\n",
        )],
    );
    let run = harness.apply(&archive, &ImportOptions::full());

    let history = report(&run, "HS");
    assert_eq!((history.counts.read, history.counts.loaded), (3, 3));
    assert!(history.counts.reconciles());
    assert_eq!(harness.count("PUBACC_HS"), 3);
}

#[rstest]
fn keyless_deltas_replace_rows_per_identifier(#[from(history)] mut harness: Harness) {
    let snapshot = harness.archive(
        "l_amat.zip",
        &[(
            "HS.dat",
            "HS|100|W1AW|01/02/2020|LIISS\nHS|100|W1AW|03/04/2021|LIREN\nHS|200|K2ABC|01/02/2020|LIISS\n",
        )],
    );
    harness.apply(&snapshot, &ImportOptions::full());

    let daily = harness.archive(
        "l_am_mon.zip",
        &[(
            "HS.dat",
            "HS|100|W1AW|01/02/2020|LIISS\nHS|100|W1AW|03/04/2021|LIREN\nHS|100|W1AW|05/06/2022|LIMOD\n",
        )],
    );
    let first = harness.apply(&daily, &ImportOptions::daily(true));
    assert_eq!(report(&first, "HS").counts.loaded, 3);
    let query = "SELECT unique_system_identifier, code FROM PUBACC_HS ORDER BY unique_system_identifier, log_date";
    let after_once = harness.rows(query);
    assert_eq!(
        after_once,
        vec![
            row(&["100", "LIISS"]),
            row(&["100", "LIREN"]),
            row(&["100", "LIMOD"]),
            row(&["200", "LIISS"]),
        ]
    );

    harness.apply(&daily, &ImportOptions::daily(true));
    assert_eq!(harness.rows(query), after_once);
}

#[rstest]
fn keyless_deltas_without_replace_keep_stored_identifiers(#[from(history)] mut harness: Harness) {
    let snapshot = harness.archive("l_amat.zip", &[("HS.dat", "HS|100|W1AW|01/02/2020|LIISS\n")]);
    harness.apply(&snapshot, &ImportOptions::full());

    let daily = harness.archive(
        "l_am_tue.zip",
        &[(
            "HS.dat",
            "HS|100|W1AW|05/06/2022|LIMOD\nHS|300|N3XYZ|05/06/2022|LIISS\nHS|300|N3XYZ|05/07/2022|LIREN\n",
        )],
    );
    let run = harness.apply(&daily, &ImportOptions::daily(false));

    let history = report(&run, "HS");
    assert_eq!((history.counts.loaded, history.counts.kept), (2, 1));
    assert!(history.counts.reconciles());
    assert_eq!(harness.count("PUBACC_HS"), 3);
    assert_eq!(
        harness.rows("SELECT code FROM PUBACC_HS WHERE unique_system_identifier = 100"),
        vec![row(&["LIISS"])]
    );
}

#[rstest]
fn bookkeeping_failures_close_the_run(mut harness: Harness) {
    harness
        .store
        .connection()
        .execute_batch(
            "CREATE TRIGGER refuse_reports BEFORE INSERT ON uls_import_run_types
             WHEN NEW.type_code = 'XX'
             BEGIN SELECT RAISE(ABORT, 'run log is read-only'); END;",
        )
        .expect("install trigger");
    let archive = harness.archive(
        "l_amat.zip",
        &[("HD.dat", "100|W1AW|ACTIVE\n"), ("XX.dat", "XX|1\n")],
    );

    let err = harness
        .run(&archive, &ImportOptions::full())
        .expect_err("bookkeeping failure must surface");
    let (run_id, status) = match err {
        ImportError::Interrupted { run_id, status, .. } => (run_id, status),
        other => panic!("expected interrupted run, got {other:?}"),
    };
    assert_eq!(status, RunStatus::Partial);

    let runs = load_runs(harness.store.connection(), None).expect("load runs");
    let recorded = runs.first().expect("run recorded");
    assert_eq!(recorded.id, run_id);
    assert_eq!(recorded.status, RunStatus::Partial);
    assert!(recorded.finished_at.is_some());
    assert!(recorded.error.as_deref().is_some_and(|error| !error.is_empty()));
    assert_eq!(
        recorded
            .record_types
            .iter()
            .map(|report| report.type_code.as_str())
            .collect::<Vec<_>>(),
        vec!["HD"]
    );
    assert_eq!(harness.count("PUBACC_HD"), 1);
}
