//! Append-only log of import runs.
//!
//! A run is inserted as `RUNNING` before any data is touched, each record
//! type's report is written as it finishes, and the run is finalised last.

use std::collections::BTreeSet;

use camino::Utf8Path;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Row, params};
use uls_core::{
    ImportMode, ImportRun, RecordTypeCounts, RecordTypeOutcome, RecordTypeReport, RunId,
    RunStatus, TypeCode,
};

use super::StoreError;

const SOURCE_SEPARATOR: char = '\n';

pub(crate) fn begin_run(
    connection: &Connection,
    mode: ImportMode,
    sources: &[String],
    started_at: DateTime<Utc>,
) -> Result<RunId, StoreError> {
    connection
        .execute(
            "INSERT INTO uls_import_runs (mode, sources, started_at, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                mode.as_str(),
                sources.join(&SOURCE_SEPARATOR.to_string()),
                timestamp(started_at),
                RunStatus::Running.as_str()
            ],
        )
        .map_err(|source| StoreError::Query {
            operation: "record the start of an import run",
            source,
        })?;
    Ok(RunId(connection.last_insert_rowid()))
}

pub(crate) fn record_type_report(
    connection: &Connection,
    run: RunId,
    position: usize,
    report: &RecordTypeReport,
) -> Result<(), StoreError> {
    let counts = &report.counts;
    connection
        .prepare_cached(
            "INSERT INTO uls_import_run_types (
                run_id,
                position,
                type_code,
                source_file,
                table_name,
                outcome,
                rows_read,
                rows_loaded,
                rows_loaded_with_warnings,
                rows_kept,
                rows_rejected,
                rows_unrecognized,
                error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .and_then(|mut statement| {
            statement.execute(params![
                run.0,
                to_sql_count(position)?,
                report.type_code.as_str(),
                report.source_file,
                report.table_name,
                report.outcome.as_str(),
                to_sql_count(counts.read)?,
                to_sql_count(counts.loaded)?,
                to_sql_count(counts.loaded_with_warnings)?,
                to_sql_count(counts.kept)?,
                to_sql_count(counts.rejected)?,
                to_sql_count(counts.unrecognized)?,
                report.error
            ])
        })
        .map(|_| ())
        .map_err(|source| StoreError::Query {
            operation: "record a record-type report",
            source,
        })
}

pub(crate) fn finish_run(
    connection: &Connection,
    run: RunId,
    status: RunStatus,
    finished_at: DateTime<Utc>,
    error: Option<&str>,
) -> Result<(), StoreError> {
    connection
        .execute(
            "UPDATE uls_import_runs
             SET status = ?2, finished_at = ?3, error = ?4
             WHERE id = ?1",
            params![run.0, status.as_str(), timestamp(finished_at), error],
        )
        .map(|_| ())
        .map_err(|source| StoreError::Query {
            operation: "finalise an import run",
            source,
        })
}

/// Load import runs, most recent first.
///
/// `limit` caps the number of runs returned; `None` returns all of them.
pub fn load_runs(connection: &Connection, limit: Option<usize>) -> Result<Vec<ImportRun>, StoreError> {
    let limit = limit.map_or(-1, |value| i64::try_from(value).unwrap_or(i64::MAX));
    let query_error = |source| StoreError::Query {
        operation: "read import runs",
        source,
    };
    let mut statement = connection
        .prepare_cached(
            "SELECT id, mode, sources, started_at, finished_at, status, error
             FROM uls_import_runs
             ORDER BY id DESC
             LIMIT ?1",
        )
        .map_err(query_error)?;
    let rows = statement
        .query_map([limit], StoredRun::from_row)
        .and_then(Iterator::collect::<Result<Vec<_>, _>>)
        .map_err(query_error)?;

    rows.into_iter()
        .map(|stored| {
            let record_types = load_reports(connection, RunId(stored.id))?;
            stored.into_run(record_types)
        })
        .collect()
}

/// File names of sources applied by runs that finished `SUCCEEDED`.
pub(crate) fn applied_sources(connection: &Connection) -> Result<BTreeSet<String>, StoreError> {
    let query_error = |source| StoreError::Query {
        operation: "read applied sources",
        source,
    };
    let mut statement = connection
        .prepare_cached("SELECT sources FROM uls_import_runs WHERE status = ?1")
        .map_err(query_error)?;
    let rows = statement
        .query_map([RunStatus::Succeeded.as_str()], |row| row.get::<_, String>(0))
        .and_then(Iterator::collect::<Result<Vec<_>, _>>)
        .map_err(query_error)?;
    Ok(rows
        .iter()
        .flat_map(|sources| sources.split(SOURCE_SEPARATOR))
        .filter_map(|source| Utf8Path::new(source).file_name())
        .map(str::to_owned)
        .collect())
}

fn load_reports(connection: &Connection, run: RunId) -> Result<Vec<RecordTypeReport>, StoreError> {
    let query_error = |source| StoreError::Query {
        operation: "read record-type reports",
        source,
    };
    let mut statement = connection
        .prepare_cached(
            "SELECT type_code, source_file, table_name, outcome, rows_read, rows_loaded,
                    rows_loaded_with_warnings, rows_kept, rows_rejected, rows_unrecognized, error
             FROM uls_import_run_types
             WHERE run_id = ?1
             ORDER BY position",
        )
        .map_err(query_error)?;
    let stored = statement
        .query_map([run.0], StoredReport::from_row)
        .and_then(Iterator::collect::<Result<Vec<_>, _>>)
        .map_err(query_error)?;
    stored.into_iter().map(StoredReport::into_report).collect()
}

struct StoredRun {
    id: i64,
    mode: String,
    sources: String,
    started_at: String,
    finished_at: Option<String>,
    status: String,
    error: Option<String>,
}

impl StoredRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            mode: row.get(1)?,
            sources: row.get(2)?,
            started_at: row.get(3)?,
            finished_at: row.get(4)?,
            status: row.get(5)?,
            error: row.get(6)?,
        })
    }

    fn into_run(self, record_types: Vec<RecordTypeReport>) -> Result<ImportRun, StoreError> {
        let mode = self
            .mode
            .parse::<ImportMode>()
            .map_err(|_| corrupt("mode", &self.mode))?;
        let status = self
            .status
            .parse::<RunStatus>()
            .map_err(|_| corrupt("status", &self.status))?;
        let finished_at = self
            .finished_at
            .as_deref()
            .map(|value| parse_timestamp("finished_at", value))
            .transpose()?;
        Ok(ImportRun {
            id: RunId(self.id),
            mode,
            sources: self
                .sources
                .split(SOURCE_SEPARATOR)
                .filter(|source| !source.is_empty())
                .map(str::to_owned)
                .collect(),
            started_at: parse_timestamp("started_at", &self.started_at)?,
            finished_at,
            status,
            record_types,
            error: self.error,
        })
    }
}

struct StoredReport {
    type_code: String,
    source_file: String,
    table_name: Option<String>,
    outcome: String,
    counts: [i64; 6],
    error: Option<String>,
}

impl StoredReport {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            type_code: row.get(0)?,
            source_file: row.get(1)?,
            table_name: row.get(2)?,
            outcome: row.get(3)?,
            counts: [
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
            ],
            error: row.get(10)?,
        })
    }

    fn into_report(self) -> Result<RecordTypeReport, StoreError> {
        let outcome = self
            .outcome
            .parse::<RecordTypeOutcome>()
            .map_err(|_| corrupt("outcome", &self.outcome))?;
        let [read, loaded, loaded_with_warnings, kept, rejected, unrecognized] =
            self.counts.map(|value| u64::try_from(value).map_err(|_| value));
        let count = |value: Result<u64, i64>| {
            value.map_err(|raw| corrupt("row count", &raw.to_string()))
        };
        Ok(RecordTypeReport {
            type_code: TypeCode::new(&self.type_code),
            source_file: self.source_file,
            table_name: self.table_name,
            outcome,
            counts: RecordTypeCounts {
                read: count(read)?,
                loaded: count(loaded)?,
                loaded_with_warnings: count(loaded_with_warnings)?,
                kept: count(kept)?,
                rejected: count(rejected)?,
                unrecognized: count(unrecognized)?,
            },
            error: self.error,
        })
    }
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| corrupt(field, value))
}

fn corrupt(field: &'static str, value: &str) -> StoreError {
    StoreError::CorruptBookkeeping {
        field,
        value: value.to_owned(),
    }
}

fn to_sql_count<T>(value: T) -> rusqlite::Result<i64>
where
    i64: TryFrom<T, Error = std::num::TryFromIntError>,
{
    i64::try_from(value).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}
