//! Apply archives to the store.
//!
//! Every record type in an archive is loaded inside its own immediate
//! transaction, so a failure rolls back that type alone and readers never
//! observe a half-loaded table. The record-type report is written inside the
//! same transaction as the data it describes.
//!
//! Each invocation appends one [`ImportRun`] to the run log. The run is
//! written as `RUNNING` before the archive is opened and finalised with its
//! derived [`RunStatus`] once every record type has been attempted. When the
//! run log itself cannot be written part-way through, the run is still closed
//! with the status its committed record types imply.
//!
//! Types with a declared natural key upsert by that key. Key-less types hold
//! many rows per license: snapshots append every row and daily deltas
//! replace (or keep) the stored rows of each identifier they carry.

mod sql;

use std::collections::{BTreeSet, HashMap};

use camino::Utf8Path;
use chrono::Utc;
use log::{debug, info, warn};
use rusqlite::{Connection, TransactionBehavior, params_from_iter};
use thiserror::Error;
use uls_core::{
    ImportMode, ImportRun, InvalidFieldPolicy, RecordTypeCounts, RecordTypeOutcome,
    RecordTypeReport, RecordTypeSchema, ReplacePolicy, RowDisposition, RunId, RunStatus,
    SchemaRegistry, TypeCode, TypedRecord, Value, normalize,
};

use crate::archive::{ArchiveError, ArchiveReader, RecordEntry};
use crate::store::{StoreError, runs};
use sql::{LoadStatements, Strategy, group_key};
pub(crate) use sql::SqlValue;

/// How an import applies its archive.
///
/// # Examples
/// ```
/// use uls_core::{ImportMode, InvalidFieldPolicy, ReplacePolicy, TypeCode};
/// use uls_data::import::ImportOptions;
///
/// let options = ImportOptions::daily(true)
///     .with_replace_policy(ReplacePolicy::replace_all().with_override(TypeCode::new("EN"), false))
///     .with_invalid_field_policy(InvalidFieldPolicy::RejectRecord);
/// assert_eq!(options.mode(), ImportMode::Daily);
/// assert!(!options.replaces(&TypeCode::new("EN")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    mode: ImportMode,
    replace: ReplacePolicy,
    invalid_fields: InvalidFieldPolicy,
}

impl ImportOptions {
    /// Truncate-and-reload each record type present in the snapshot.
    #[must_use]
    pub fn full() -> Self {
        Self {
            mode: ImportMode::Full,
            replace: ReplacePolicy::replace_all(),
            invalid_fields: InvalidFieldPolicy::default(),
        }
    }

    /// Apply a daily delta; `replace` sets the default for every type.
    #[must_use]
    pub fn daily(replace: bool) -> Self {
        Self {
            mode: ImportMode::Daily,
            replace: if replace {
                ReplacePolicy::replace_all()
            } else {
                ReplacePolicy::keep_existing()
            },
            invalid_fields: InvalidFieldPolicy::default(),
        }
    }

    /// Per-record-type replace rules for daily imports.
    #[must_use]
    pub fn with_replace_policy(mut self, policy: ReplacePolicy) -> Self {
        self.replace = policy;
        self
    }

    /// Treatment of records whose fields failed coercion.
    #[must_use]
    pub const fn with_invalid_field_policy(mut self, policy: InvalidFieldPolicy) -> Self {
        self.invalid_fields = policy;
        self
    }

    /// Selected mode.
    #[must_use]
    pub const fn mode(&self) -> ImportMode {
        self.mode
    }

    /// Whether incoming records of `type_code` overwrite stored ones.
    ///
    /// Full imports always overwrite: duplicate keys within a snapshot keep
    /// the last row read.
    #[must_use]
    pub fn replaces(&self, type_code: &TypeCode) -> bool {
        match self.mode {
            ImportMode::Full => true,
            ImportMode::Daily => self.replace.replaces(type_code),
        }
    }

    /// Selected invalid-field policy.
    #[must_use]
    pub const fn invalid_field_policy(&self) -> InvalidFieldPolicy {
        self.invalid_fields
    }
}

/// Errors that abort a whole import invocation.
///
/// Record-type failures are not errors: they are reported as rolled-back
/// record types inside the returned [`ImportRun`].
#[derive(Debug, Error)]
pub enum ImportError {
    /// The archive could not be opened. The run is recorded as failed.
    #[error("import run {run_id} failed: {source}")]
    Archive {
        /// Run recorded for the attempt.
        run_id: RunId,
        /// Cause.
        #[source]
        source: ArchiveError,
    },
    /// Run bookkeeping could not be written.
    #[error("failed to update import run bookkeeping")]
    Bookkeeping(#[from] StoreError),
    /// Bookkeeping failed part-way through the archive. Record types after
    /// the failure were not attempted and the run was closed as `status`.
    #[error("import run {run_id} stopped as {status}: {source}")]
    Interrupted {
        /// Run recorded for the attempt.
        run_id: RunId,
        /// Status the run was closed with.
        status: RunStatus,
        /// Cause.
        #[source]
        source: StoreError,
    },
}

/// Loads archives into record-type tables.
#[derive(Debug)]
pub struct ImportEngine<'a> {
    connection: &'a mut Connection,
    registry: &'a SchemaRegistry,
}

impl<'a> ImportEngine<'a> {
    /// Bind the engine to a connection and the record types it may load.
    pub fn new(connection: &'a mut Connection, registry: &'a SchemaRegistry) -> Self {
        Self {
            connection,
            registry,
        }
    }

    /// Apply the archive or record directory at `source`.
    ///
    /// Returns the finalised run. Rows that fail validation, record types
    /// that roll back and unknown record types are all reported in the run
    /// rather than returned as errors.
    pub fn run(&mut self, source: &Utf8Path, options: &ImportOptions) -> Result<ImportRun, ImportError> {
        let started_at = Utc::now();
        let sources = vec![source.to_string()];
        let run_id = runs::begin_run(self.connection, options.mode(), &sources, started_at)?;
        info!("import run {run_id} ({}) started for {source}", options.mode());

        let mut reader = match ArchiveReader::open(source) {
            Ok(reader) => reader,
            Err(err) => {
                warn!("import run {run_id} failed: {err}");
                runs::finish_run(
                    self.connection,
                    run_id,
                    RunStatus::Failed,
                    Utc::now(),
                    Some(&err.to_string()),
                )?;
                return Err(ImportError::Archive {
                    run_id,
                    source: err,
                });
            }
        };

        let mut record_types = Vec::new();
        if let Err(err) = self.apply_entries(run_id, &mut reader, options, &mut record_types) {
            let status = RunStatus::from_outcomes(
                record_types
                    .iter()
                    .map(|report| report.outcome)
                    .chain([RecordTypeOutcome::RolledBack]),
            );
            warn!("import run {run_id} stopped after {} record types: {err}", record_types.len());
            if let Err(finish) =
                runs::finish_run(self.connection, run_id, status, Utc::now(), Some(&err.to_string()))
            {
                warn!("import run {run_id} could not be closed: {finish}");
            }
            return Err(ImportError::Interrupted {
                run_id,
                status,
                source: err,
            });
        }

        let status = RunStatus::from_outcomes(record_types.iter().map(|report| report.outcome));
        let finished_at = Utc::now();
        runs::finish_run(self.connection, run_id, status, finished_at, None)?;
        info!("import run {run_id} finished: {status}");

        Ok(ImportRun {
            id: run_id,
            mode: options.mode(),
            sources,
            started_at,
            finished_at: Some(finished_at),
            status,
            record_types,
            error: None,
        })
    }

    fn apply_entries(
        &mut self,
        run_id: RunId,
        reader: &mut ArchiveReader,
        options: &ImportOptions,
        record_types: &mut Vec<RecordTypeReport>,
    ) -> Result<(), StoreError> {
        let registry = self.registry;
        let mut truncated = BTreeSet::new();
        while let Some(entry) = reader.next_entry() {
            let position = record_types.len();
            let report = match registry.get(&entry.type_code) {
                Some(schema) => {
                    let truncate = options.mode() == ImportMode::Full
                        && truncated.insert(entry.type_code.clone());
                    self.load_record_type(run_id, position, schema, entry, options, truncate)?
                }
                None => self.skip_unrecognized(run_id, position, entry)?,
            };
            record_types.push(report);
        }
        Ok(())
    }

    fn load_record_type(
        &mut self,
        run_id: RunId,
        position: usize,
        schema: &RecordTypeSchema,
        entry: RecordEntry<'_>,
        options: &ImportOptions,
        truncate: bool,
    ) -> Result<RecordTypeReport, StoreError> {
        let mut report = RecordTypeReport {
            type_code: entry.type_code.clone(),
            source_file: entry.file_name.clone(),
            table_name: Some(schema.table_name().to_owned()),
            outcome: RecordTypeOutcome::Committed,
            counts: RecordTypeCounts::default(),
            error: None,
        };

        let loaded = load_in_transaction(
            self.connection,
            schema,
            entry,
            options,
            truncate,
            &mut report,
            |transaction, report| runs::record_type_report(transaction, run_id, position, report),
        );

        match loaded {
            Ok(()) => {
                let counts = &report.counts;
                info!(
                    "{} loaded {} of {} rows into {} ({} with warnings, {} kept, {} rejected)",
                    report.type_code,
                    counts.loaded,
                    counts.read,
                    schema.table_name(),
                    counts.loaded_with_warnings,
                    counts.kept,
                    counts.rejected
                );
                if counts.rejected > 0 {
                    warn!("{} rejected {} rows", report.type_code, counts.rejected);
                }
            }
            Err(failure) => {
                warn!(
                    "{} rolled back after {} rows: {failure}",
                    report.type_code, report.counts.read
                );
                report.outcome = RecordTypeOutcome::RolledBack;
                report.counts = report.counts.rolled_back();
                report.error = Some(failure.to_string());
                runs::record_type_report(self.connection, run_id, position, &report)?;
            }
        }
        Ok(report)
    }

    fn skip_unrecognized(
        &mut self,
        run_id: RunId,
        position: usize,
        entry: RecordEntry<'_>,
    ) -> Result<RecordTypeReport, StoreError> {
        let mut counts = RecordTypeCounts::default();
        for _ in entry.rows {
            counts.record(RowDisposition::Unrecognized);
        }
        warn!(
            "skipping {} rows of unrecognized record type {} from {}",
            counts.unrecognized, entry.type_code, entry.file_name
        );
        let report = RecordTypeReport {
            type_code: entry.type_code,
            source_file: entry.file_name,
            table_name: None,
            outcome: RecordTypeOutcome::Unrecognized,
            counts,
            error: None,
        };
        runs::record_type_report(self.connection, run_id, position, &report)?;
        Ok(report)
    }
}

/// Why a record type's transaction rolled back.
#[derive(Debug, Error)]
enum LoadFailure {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{0}")]
    Bookkeeping(#[from] StoreError),
    #[error("{source_file} line {line}: {message}")]
    CorruptEntry {
        source_file: String,
        line: u64,
        message: String,
    },
}

fn load_in_transaction<F>(
    connection: &mut Connection,
    schema: &RecordTypeSchema,
    entry: RecordEntry<'_>,
    options: &ImportOptions,
    truncate: bool,
    report: &mut RecordTypeReport,
    write_report: F,
) -> Result<(), LoadFailure>
where
    F: FnOnce(&Connection, &RecordTypeReport) -> Result<(), StoreError>,
{
    let statements = LoadStatements::new(
        schema,
        options.replaces(&entry.type_code),
        options.mode() == ImportMode::Daily,
    );
    let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    if truncate {
        let removed = transaction.execute(&statements.truncate, [])?;
        debug!("cleared {removed} rows from {}", schema.table_name());
    }

    {
        let mut insert = transaction.prepare(&statements.insert)?;
        let mut groups: HashMap<String, bool> = HashMap::new();
        for row in entry.rows {
            if let Some(defect) = &row.defect {
                report.counts.record(RowDisposition::Rejected);
                return Err(LoadFailure::CorruptEntry {
                    source_file: row.source.clone(),
                    line: row.line,
                    message: defect.to_string(),
                });
            }
            let record = normalize(&row, schema);
            let Some(warnings) = loadable(&record, options.invalid_field_policy()) else {
                debug!(
                    "{}:{} rejected: {}",
                    row.source,
                    row.line,
                    describe_warnings(&record)
                );
                report.counts.record(RowDisposition::Rejected);
                continue;
            };
            if warnings {
                debug!("{}:{} loaded with warnings: {}", row.source, row.line, describe_warnings(&record));
            }
            let values = || params_from_iter(record.values.iter().map(SqlValue));
            let disposition = match &statements.strategy {
                Strategy::Upsert { overwrites } => {
                    let changed = insert.execute(values())?;
                    if changed == 0 && !overwrites {
                        RowDisposition::Kept
                    } else {
                        RowDisposition::Loaded { warnings }
                    }
                }
                Strategy::Append => {
                    insert.execute(values())?;
                    RowDisposition::Loaded { warnings }
                }
                Strategy::Group {
                    column,
                    replace,
                    delete,
                    exists,
                } => {
                    let identifier = record
                        .values
                        .get(*column)
                        .and_then(|value| group_key(value).map(|key| (value, key)));
                    let accepted = match identifier {
                        None => true,
                        Some((value, key)) => {
                            if let Some(accepted) = groups.get(&key) {
                                *accepted
                            } else {
                                let accepted = claim_group(&transaction, value, *replace, delete, exists)?;
                                groups.insert(key, accepted);
                                accepted
                            }
                        }
                    };
                    if accepted {
                        insert.execute(values())?;
                        RowDisposition::Loaded { warnings }
                    } else {
                        RowDisposition::Kept
                    }
                }
            };
            report.counts.record(disposition);
        }
    }

    let connection: &Connection = &transaction;
    write_report(connection, report)?;
    transaction.commit()?;
    Ok(())
}

/// Prepare the stored group of `identifier` for incoming rows.
///
/// Replacing clears the stored rows and accepts the group. Otherwise the group
/// is accepted only when nothing is stored for it yet.
fn claim_group(
    connection: &Connection,
    identifier: &Value,
    replace: bool,
    delete: &str,
    exists: &str,
) -> rusqlite::Result<bool> {
    if replace {
        let removed = connection.prepare_cached(delete)?.execute([SqlValue(identifier)])?;
        if removed > 0 {
            debug!("replacing {removed} stored rows for identifier {identifier}");
        }
        Ok(true)
    } else {
        let stored: bool = connection
            .prepare_cached(exists)?
            .query_row([SqlValue(identifier)], |row| row.get(0))?;
        Ok(!stored)
    }
}

/// `None` when the record must be rejected, otherwise whether it carries
/// warnings.
fn loadable(record: &TypedRecord, policy: InvalidFieldPolicy) -> Option<bool> {
    if !record.valid {
        return None;
    }
    if policy == InvalidFieldPolicy::RejectRecord && record.has_invalid_fields() {
        return None;
    }
    Some(!record.warnings.is_empty())
}

fn describe_warnings(record: &TypedRecord) -> String {
    record
        .warnings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests;
