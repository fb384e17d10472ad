use rusqlite::{Connection, OptionalExtension, Transaction};

use super::StoreError;

/// Bookkeeping layout version written by this build.
pub const STORE_VERSION: i64 = 1;

/// Create the bookkeeping tables and record the store version.
///
/// Existing stores must already carry [`STORE_VERSION`]; anything else is
/// rejected so upgrades happen explicitly.
pub(super) fn migrate(connection: &mut Connection) -> Result<(), StoreError> {
    connection
        .pragma_update(None, "foreign_keys", true)
        .map_err(|source| StoreError::Configure {
            setting: "foreign_keys",
            source,
        })?;

    let transaction = connection
        .transaction()
        .map_err(|source| StoreError::Migration {
            step: "begin migration transaction",
            source,
        })?;

    create_bookkeeping_tables(&transaction)?;
    ensure_store_version(&transaction)?;

    transaction.commit().map_err(|source| StoreError::Migration {
        step: "commit migration transaction",
        source,
    })
}

/// Verify the version of a store opened without write access.
pub(super) fn check_version(connection: &Connection) -> Result<(), StoreError> {
    match read_version(connection)? {
        Some(found) if found != STORE_VERSION => Err(StoreError::VersionMismatch {
            expected: STORE_VERSION,
            found,
        }),
        Some(_) => Ok(()),
        None => Err(StoreError::VersionMismatch {
            expected: STORE_VERSION,
            found: 0,
        }),
    }
}

fn create_bookkeeping_tables(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    run_migration_step(
        transaction,
        "create uls_schema_document",
        "CREATE TABLE IF NOT EXISTS uls_schema_document (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            document TEXT NOT NULL,
            installed_at TEXT NOT NULL
        )",
    )?;
    run_migration_step(
        transaction,
        "create uls_import_runs",
        "CREATE TABLE IF NOT EXISTS uls_import_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            mode TEXT NOT NULL CHECK (mode IN ('FULL', 'DAILY')),
            sources TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL,
            error TEXT
        )",
    )?;
    run_migration_step(
        transaction,
        "create uls_import_run_types",
        "CREATE TABLE IF NOT EXISTS uls_import_run_types (
            run_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            type_code TEXT NOT NULL,
            source_file TEXT NOT NULL,
            table_name TEXT,
            outcome TEXT NOT NULL,
            rows_read INTEGER NOT NULL,
            rows_loaded INTEGER NOT NULL,
            rows_loaded_with_warnings INTEGER NOT NULL,
            rows_kept INTEGER NOT NULL,
            rows_rejected INTEGER NOT NULL,
            rows_unrecognized INTEGER NOT NULL,
            error TEXT,
            PRIMARY KEY (run_id, position),
            FOREIGN KEY (run_id) REFERENCES uls_import_runs(id) ON DELETE CASCADE
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "index uls_import_run_types",
        "CREATE INDEX IF NOT EXISTS idx_uls_import_run_types_code
            ON uls_import_run_types(type_code, run_id)",
    )
}

fn ensure_store_version(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    run_migration_step(
        transaction,
        "create uls_store_version",
        "CREATE TABLE IF NOT EXISTS uls_store_version (
            version INTEGER PRIMARY KEY CHECK (version > 0),
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ) WITHOUT ROWID",
    )?;

    match read_version(transaction)? {
        Some(version) if version == STORE_VERSION => Ok(()),
        Some(found) => Err(StoreError::VersionMismatch {
            expected: STORE_VERSION,
            found,
        }),
        None => transaction
            .execute(
                "INSERT INTO uls_store_version (version) VALUES (?1)",
                [STORE_VERSION],
            )
            .map(|_| ())
            .map_err(|source| StoreError::Migration {
                step: "record store version",
                source,
            }),
    }
}

fn read_version(connection: &Connection) -> Result<Option<i64>, StoreError> {
    connection
        .query_row("SELECT version FROM uls_store_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|source| StoreError::Migration {
            step: "read store version",
            source,
        })
}

fn run_migration_step(
    transaction: &Transaction<'_>,
    step: &'static str,
    sql: &str,
) -> Result<(), StoreError> {
    transaction
        .execute(sql, [])
        .map(|_| ())
        .map_err(|source| StoreError::Migration { step, source })
}
