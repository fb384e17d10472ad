//! Answer "what has been loaded and when" from persisted state.
//!
//! The reporter only reads. [`StatusReporter::report`] takes its run log and
//! table counts from one read transaction so both halves agree even while an
//! import commits concurrently.

use std::collections::BTreeMap;

use rusqlite::Connection;
use thiserror::Error;
use uls_core::ImportRun;

use crate::store::{StoreError, load_registry, load_runs, quote_identifier};

/// Snapshot of run history and table sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Import runs, most recent first.
    pub runs: Vec<ImportRun>,
    /// Current row count per record-type table.
    pub tables: BTreeMap<String, u64>,
}

/// Errors raised while reading status.
#[derive(Debug, Error)]
pub enum StatusError {
    /// Bookkeeping could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A count or snapshot query failed.
    #[error("failed to {operation}")]
    Query {
        /// Operation being attempted.
        operation: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
}

/// Read-only view over run bookkeeping and table sizes.
#[derive(Debug, Clone, Copy)]
pub struct StatusReporter<'a> {
    connection: &'a Connection,
}

impl<'a> StatusReporter<'a> {
    /// Wrap a connection.
    #[must_use]
    pub const fn new(connection: &'a Connection) -> Self {
        Self { connection }
    }

    /// Import runs, most recent first, capped at `limit` when given.
    pub fn summarize(&self, limit: Option<usize>) -> Result<Vec<ImportRun>, StatusError> {
        Ok(load_runs(self.connection, limit)?)
    }

    /// Row count of every record-type table present in the store.
    ///
    /// Tables are taken from the installed schema document; a store without
    /// one reports no tables.
    pub fn table_counts(&self) -> Result<BTreeMap<String, u64>, StatusError> {
        let Some(registry) = load_registry(self.connection)? else {
            return Ok(BTreeMap::new());
        };
        let mut counts = BTreeMap::new();
        for schema in registry.iter() {
            let table = schema.table_name();
            if !self.table_exists(table)? {
                continue;
            }
            let rows: i64 = self
                .connection
                .query_row(
                    &format!("SELECT COUNT(*) FROM {}", quote_identifier(table)),
                    [],
                    |row| row.get(0),
                )
                .map_err(|source| StatusError::Query {
                    operation: "count table rows",
                    source,
                })?;
            counts.insert(table.to_owned(), u64::try_from(rows).unwrap_or_default());
        }
        Ok(counts)
    }

    /// Runs and table counts read from a single snapshot.
    pub fn report(&self, limit: Option<usize>) -> Result<StatusReport, StatusError> {
        let snapshot = self
            .connection
            .unchecked_transaction()
            .map_err(|source| StatusError::Query {
                operation: "begin status snapshot",
                source,
            })?;
        let report = StatusReport {
            runs: self.summarize(limit)?,
            tables: self.table_counts()?,
        };
        snapshot.rollback().map_err(|source| StatusError::Query {
            operation: "release status snapshot",
            source,
        })?;
        Ok(report)
    }

    fn table_exists(&self, table: &str) -> Result<bool, StatusError> {
        self.connection
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [table],
                |row| row.get(0),
            )
            .map_err(|source| StatusError::Query {
                operation: "inspect table",
                source,
            })
    }
}
