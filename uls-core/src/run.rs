//! Import run bookkeeping: modes, per-record-type counts and run status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::TypeCode;

/// How an archive is applied to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum ImportMode {
    /// Truncate each present record type and reload it from the snapshot.
    Full,
    /// Upsert a day's delta by natural key.
    Daily,
}

impl ImportMode {
    /// Label persisted in the run log.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Daily => "DAILY",
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a persisted label is not recognised.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognised {kind} label '{label}'")]
pub struct ParseLabelError {
    /// Which enumeration was being parsed.
    pub kind: &'static str,
    /// Offending label.
    pub label: String,
}

impl FromStr for ImportMode {
    type Err = ParseLabelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "FULL" => Ok(Self::Full),
            "DAILY" => Ok(Self::Daily),
            _ => Err(ParseLabelError {
                kind: "import mode",
                label: value.to_owned(),
            }),
        }
    }
}

/// Terminal (or in-flight) state of an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum RunStatus {
    /// The run has started and not been finalised. A run left in this state
    /// belongs to a process that was interrupted.
    Running,
    /// Every record type committed.
    Succeeded,
    /// At least one record type committed and at least one rolled back.
    Partial,
    /// Nothing committed.
    Failed,
}

impl RunStatus {
    /// Label persisted in the run log.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
        }
    }

    /// Derive a run's status from its record-type reports.
    ///
    /// Unrecognized record types never affect the status. Rows loaded with
    /// warnings still count as a successful load.
    ///
    /// # Examples
    /// ```
    /// use uls_core::{RecordTypeOutcome, RunStatus};
    ///
    /// let outcomes = [RecordTypeOutcome::Committed, RecordTypeOutcome::RolledBack];
    /// assert_eq!(RunStatus::from_outcomes(outcomes), RunStatus::Partial);
    /// assert_eq!(RunStatus::from_outcomes([]), RunStatus::Succeeded);
    /// ```
    #[must_use]
    pub fn from_outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = RecordTypeOutcome>,
    {
        let (mut committed, mut rolled_back) = (false, false);
        for outcome in outcomes {
            match outcome {
                RecordTypeOutcome::Committed => committed = true,
                RecordTypeOutcome::RolledBack => rolled_back = true,
                RecordTypeOutcome::Unrecognized => {}
            }
        }
        match (committed, rolled_back) {
            (_, false) => Self::Succeeded,
            (true, true) => Self::Partial,
            (false, true) => Self::Failed,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ParseLabelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "PARTIAL" => Ok(Self::Partial),
            "FAILED" => Ok(Self::Failed),
            _ => Err(ParseLabelError {
                kind: "run status",
                label: value.to_owned(),
            }),
        }
    }
}

/// What happened to one record type within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum RecordTypeOutcome {
    /// The record type's transaction committed.
    Committed,
    /// The transaction rolled back; the table is unchanged.
    RolledBack,
    /// The type is unknown to the schema registry and was skipped.
    Unrecognized,
}

impl RecordTypeOutcome {
    /// Label persisted in the run log.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "COMMITTED",
            Self::RolledBack => "ROLLED_BACK",
            Self::Unrecognized => "UNRECOGNIZED",
        }
    }
}

impl fmt::Display for RecordTypeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordTypeOutcome {
    type Err = ParseLabelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "COMMITTED" => Ok(Self::Committed),
            "ROLLED_BACK" => Ok(Self::RolledBack),
            "UNRECOGNIZED" => Ok(Self::Unrecognized),
            _ => Err(ParseLabelError {
                kind: "record type outcome",
                label: value.to_owned(),
            }),
        }
    }
}

/// Row accounting for one record type.
///
/// `loaded_with_warnings` is a subset of `loaded`. Every row read lands in
/// exactly one of `loaded`, `kept`, `rejected` or `unrecognized`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecordTypeCounts {
    /// Rows read from the source file.
    pub read: u64,
    /// Rows written to the table.
    pub loaded: u64,
    /// Loaded rows that carried warnings.
    pub loaded_with_warnings: u64,
    /// Rows skipped because an insert-only import found the key present.
    pub kept: u64,
    /// Rows that failed validation or belong to a rolled-back transaction.
    pub rejected: u64,
    /// Rows of a type the registry does not know.
    pub unrecognized: u64,
}

impl RecordTypeCounts {
    /// Whether every row read is accounted for.
    ///
    /// # Examples
    /// ```
    /// use uls_core::RecordTypeCounts;
    ///
    /// let counts = RecordTypeCounts { read: 3, loaded: 2, rejected: 1, ..Default::default() };
    /// assert!(counts.reconciles());
    /// ```
    #[must_use]
    pub const fn reconciles(&self) -> bool {
        self.loaded_with_warnings <= self.loaded
            && self.read == self.loaded + self.kept + self.rejected + self.unrecognized
    }

    /// Tally one row.
    pub fn record(&mut self, disposition: RowDisposition) {
        self.read += 1;
        match disposition {
            RowDisposition::Loaded { warnings } => {
                self.loaded += 1;
                if warnings {
                    self.loaded_with_warnings += 1;
                }
            }
            RowDisposition::Kept => self.kept += 1,
            RowDisposition::Rejected => self.rejected += 1,
            RowDisposition::Unrecognized => self.unrecognized += 1,
        }
    }

    /// Reclassify every row read as rejected after a rollback.
    #[must_use]
    pub const fn rolled_back(self) -> Self {
        Self {
            read: self.read,
            loaded: 0,
            loaded_with_warnings: 0,
            kept: 0,
            rejected: self.read,
            unrecognized: 0,
        }
    }
}

/// Where a single row ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowDisposition {
    /// Written to the table.
    Loaded {
        /// Whether the row carried warnings.
        warnings: bool,
    },
    /// Skipped by an insert-only import because the key already existed.
    Kept,
    /// Failed validation.
    Rejected,
    /// Belongs to an unknown record type.
    Unrecognized,
}

/// Outcome of one record type within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecordTypeReport {
    /// Record type code.
    pub type_code: TypeCode,
    /// File within the source the rows came from.
    pub source_file: String,
    /// Target table, absent for unrecognized types.
    pub table_name: Option<String>,
    /// Transaction outcome.
    pub outcome: RecordTypeOutcome,
    /// Row accounting.
    pub counts: RecordTypeCounts,
    /// Failure description for rolled-back types.
    pub error: Option<String>,
}

/// Identifier of a persisted import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct RunId(pub i64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable record of one import invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImportRun {
    /// Run identifier, increasing with each run.
    pub id: RunId,
    /// Import mode.
    pub mode: ImportMode,
    /// Archive or directory names applied by the run.
    pub sources: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run was finalised, if it was.
    pub finished_at: Option<DateTime<Utc>>,
    /// Run status.
    pub status: RunStatus,
    /// Per-record-type outcomes in processing order.
    pub record_types: Vec<RecordTypeReport>,
    /// Failure that aborted the whole run, if any.
    pub error: Option<String>,
}

impl ImportRun {
    /// Record types whose tables did not receive this run's data.
    pub fn stale_record_types(&self) -> impl Iterator<Item = &TypeCode> + '_ {
        self.record_types
            .iter()
            .filter(|report| report.outcome == RecordTypeOutcome::RolledBack)
            .map(|report| &report.type_code)
    }

    /// Look up the report for one record type.
    #[must_use]
    pub fn report(&self, type_code: &TypeCode) -> Option<&RecordTypeReport> {
        self.record_types
            .iter()
            .find(|report| &report.type_code == type_code)
    }
}
