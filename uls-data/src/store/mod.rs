//! SQLite store holding record-type tables and import bookkeeping.
//!
//! The module is split into focused submodules:
//! - [`migrations`] creates and versions the bookkeeping tables.
//! - [`tables`] installs one table per record type from a schema document.
//! - [`runs`] reads and writes the append-only import run log.
#![forbid(unsafe_code)]

mod migrations;
pub(crate) mod runs;
mod tables;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;
use uls_core::{SchemaError, SchemaRegistry};

pub use migrations::STORE_VERSION;
pub use runs::load_runs;
pub(crate) use tables::load_registry;
pub use tables::{LOOKUP_COLUMNS, quote_identifier};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings applied when a store is opened.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use uls_data::store::StoreOptions;
///
/// let options = StoreOptions::default()
///     .with_busy_timeout(Duration::from_secs(30))
///     .with_wal(false);
/// assert_eq!(options.busy_timeout(), Duration::from_secs(30));
/// assert!(!options.wal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    busy_timeout: Duration,
    wal: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            wal: true,
        }
    }
}

impl StoreOptions {
    /// How long a writer waits for a competing transaction to finish.
    #[must_use]
    pub const fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Use write-ahead logging so readers are not blocked by imports.
    #[must_use]
    pub const fn with_wal(mut self, enabled: bool) -> Self {
        self.wal = enabled;
        self
    }

    /// Configured busy timeout.
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Whether WAL journaling is requested.
    #[must_use]
    pub const fn wal(&self) -> bool {
        self.wal
    }
}

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database directory could not be created.
    #[error("failed to create directory for store {path}")]
    CreateDirectory {
        /// Database path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The database could not be opened.
    #[error("failed to open store at {path}")]
    Open {
        /// Database path.
        path: Utf8PathBuf,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// A connection setting could not be applied.
    #[error("failed to apply store setting '{setting}'")]
    Configure {
        /// Setting being applied.
        setting: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// A bookkeeping migration step failed.
    #[error("failed to execute migration step '{step}'")]
    Migration {
        /// Step being executed.
        step: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// The store was created by an incompatible version.
    #[error("expected store version {expected} but found {found}; migrate the store before retrying")]
    VersionMismatch {
        /// Version this build understands.
        expected: i64,
        /// Version recorded in the store.
        found: i64,
    },
    /// The stored or supplied schema document is malformed.
    #[error("schema document is invalid")]
    Schema(#[from] SchemaError),
    /// No schema document has been installed.
    #[error("store has no record-type schema; run init-schema first")]
    SchemaNotInitialised,
    /// An existing table disagrees with the schema document.
    #[error("table {table} has columns [{found}] but the schema declares [{expected}]")]
    TableLayoutMismatch {
        /// Table name.
        table: String,
        /// Columns declared by the schema document.
        expected: String,
        /// Columns found in the store.
        found: String,
    },
    /// A query or statement failed.
    #[error("failed to {operation}")]
    Query {
        /// Operation being attempted.
        operation: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// A persisted bookkeeping value could not be decoded.
    #[error("stored {field} value '{value}' is invalid")]
    CorruptBookkeeping {
        /// Column holding the value.
        field: &'static str,
        /// Value read back.
        value: String,
    },
}

/// Handle on the relational store.
#[derive(Debug)]
pub struct Store {
    connection: Connection,
    path: Option<Utf8PathBuf>,
}

impl Store {
    /// Open (or create) the store at `path` and apply bookkeeping migrations.
    pub fn open(path: &Utf8Path, options: &StoreOptions) -> Result<Self, StoreError> {
        uls_fs::ensure_parent_dir(path).map_err(|source| StoreError::CreateDirectory {
            path: path.to_owned(),
            source,
        })?;
        let connection = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_owned(),
            source,
        })?;
        Self::prepare(connection, Some(path.to_owned()), options)
    }

    /// Open an existing store without write access.
    ///
    /// Read-only handles skip migrations; the store must already exist.
    pub fn open_read_only(path: &Utf8Path) -> Result<Self, StoreError> {
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| StoreError::Open {
            path: path.to_owned(),
            source,
        })?;
        connection
            .busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .map_err(|source| StoreError::Configure {
                setting: "busy_timeout",
                source,
            })?;
        migrations::check_version(&connection)?;
        Ok(Self {
            connection,
            path: Some(path.to_owned()),
        })
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: Utf8PathBuf::from(":memory:"),
            source,
        })?;
        Self::prepare(connection, None, &StoreOptions::default().with_wal(false))
    }

    fn prepare(
        mut connection: Connection,
        path: Option<Utf8PathBuf>,
        options: &StoreOptions,
    ) -> Result<Self, StoreError> {
        connection
            .busy_timeout(options.busy_timeout())
            .map_err(|source| StoreError::Configure {
                setting: "busy_timeout",
                source,
            })?;
        if options.wal() {
            connection
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|source| StoreError::Configure {
                    setting: "journal_mode",
                    source,
                })?;
        }
        migrations::migrate(&mut connection)?;
        Ok(Self { connection, path })
    }

    /// Location of the database, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    /// Borrow the underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Borrow the underlying connection mutably.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Parse `document`, create one table per record type and remember the
    /// document for later imports.
    ///
    /// The schema is validated before anything is written. Re-running with
    /// the same document is a no-op apart from refreshing the stored copy.
    pub fn init_schema(&mut self, document: &str) -> Result<SchemaRegistry, StoreError> {
        let registry = SchemaRegistry::load(document)?;
        tables::install(&mut self.connection, &registry, document)?;
        log::info!("installed {} record types", registry.len());
        Ok(registry)
    }

    /// Rebuild the registry from the stored schema document.
    pub fn registry(&self) -> Result<SchemaRegistry, StoreError> {
        tables::load_registry(&self.connection)?.ok_or(StoreError::SchemaNotInitialised)
    }

    /// Rebuild the database file, reclaiming free pages.
    pub fn vacuum(&self) -> Result<(), StoreError> {
        self.maintenance("vacuum the store", "VACUUM")
    }

    /// Refresh the query planner's statistics.
    pub fn analyze(&self) -> Result<(), StoreError> {
        self.maintenance("analyze the store", "ANALYZE")
    }

    fn maintenance(&self, operation: &'static str, sql: &str) -> Result<(), StoreError> {
        log::info!("running {sql}");
        self.connection
            .execute_batch(sql)
            .map_err(|source| StoreError::Query { operation, source })
    }
}

#[cfg(test)]
mod tests;
