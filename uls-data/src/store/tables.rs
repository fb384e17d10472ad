use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use uls_core::{RecordTypeSchema, SchemaRegistry};

use super::StoreError;

/// Columns that receive a secondary index when a record type declares them.
pub const LOOKUP_COLUMNS: [&str; 7] = [
    "call_sign",
    "callsign",
    "uls_file_number",
    "unique_system_identifier",
    "licensee_id",
    "entity_name",
    "frn",
];

/// Quote an identifier for interpolation into SQL.
///
/// Identifiers reaching this point have been validated by the schema
/// registry, so embedded quotes are only doubled for completeness.
#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

pub(super) fn install(
    connection: &mut Connection,
    registry: &SchemaRegistry,
    document: &str,
) -> Result<(), StoreError> {
    let transaction = connection
        .transaction()
        .map_err(|source| StoreError::Query {
            operation: "begin schema installation",
            source,
        })?;

    for schema in registry.iter() {
        install_record_type(&transaction, schema)?;
    }

    transaction
        .execute(
            "INSERT INTO uls_schema_document (id, document, installed_at)
             VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                document = excluded.document,
                installed_at = excluded.installed_at",
            params![
                document,
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
            ],
        )
        .map_err(|source| StoreError::Query {
            operation: "store the schema document",
            source,
        })?;

    transaction.commit().map_err(|source| StoreError::Query {
        operation: "commit schema installation",
        source,
    })
}

pub(crate) fn load_registry(connection: &Connection) -> Result<Option<SchemaRegistry>, StoreError> {
    let document: Option<String> = connection
        .query_row(
            "SELECT document FROM uls_schema_document WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|source| StoreError::Query {
            operation: "read the schema document",
            source,
        })?;
    document
        .map(|text| SchemaRegistry::load(&text).map_err(StoreError::from))
        .transpose()
}

fn install_record_type(
    transaction: &Transaction<'_>,
    schema: &RecordTypeSchema,
) -> Result<(), StoreError> {
    let table = schema.table_name();
    let existing = existing_columns(transaction, table)?;
    if existing.is_empty() {
        let columns = schema
            .columns()
            .iter()
            .map(|column| {
                format!(
                    "{} {}",
                    quote_identifier(&column.name),
                    column.column_type.sql_affinity()
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        execute(
            transaction,
            "create record-type table",
            &format!("CREATE TABLE {} ({columns})", quote_identifier(table)),
        )?;
        log::debug!("created table {table}");
    } else {
        ensure_layout(schema, &existing)?;
    }

    sync_key_index(transaction, schema)?;

    let single_key = schema
        .key_columns()
        .next()
        .filter(|_| schema.key_indices().len() == 1)
        .map(|column| column.name.to_ascii_lowercase());
    let identifier = schema
        .identifier_column()
        .filter(|_| !schema.has_key())
        .map(|column| column.name.to_ascii_lowercase());
    for column in schema.columns() {
        let name = column.name.to_ascii_lowercase();
        let indexed = LOOKUP_COLUMNS.contains(&name.as_str()) || identifier.as_deref() == Some(name.as_str());
        if !indexed || single_key.as_deref() == Some(name.as_str()) {
            continue;
        }
        execute(
            transaction,
            "create lookup index",
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_identifier(&format!("ix_{table}_{}", column.name)),
                quote_identifier(table),
                quote_identifier(&column.name)
            ),
        )?;
    }
    Ok(())
}

/// Make the unique key index match the declared key.
///
/// An index left by an earlier document with a different key (or with a key
/// the document no longer declares) is dropped first.
fn sync_key_index(connection: &Connection, schema: &RecordTypeSchema) -> Result<(), StoreError> {
    let table = schema.table_name();
    let index = format!("ux_{table}_key");
    let declared: Vec<&str> = schema.key_columns().map(|column| column.name.as_str()).collect();
    let existing = index_columns(connection, &index)?;
    let current = existing.len() == declared.len()
        && existing
            .iter()
            .zip(&declared)
            .all(|(left, right)| left.eq_ignore_ascii_case(right));
    if current {
        return Ok(());
    }

    if !existing.is_empty() {
        log::info!(
            "replacing key index on {table}: ({}) becomes ({})",
            existing.join(", "),
            declared.join(", ")
        );
        execute(
            connection,
            "drop stale key index",
            &format!("DROP INDEX {}", quote_identifier(&index)),
        )?;
    }
    if declared.is_empty() {
        return Ok(());
    }
    let key_columns = declared
        .iter()
        .map(|name| quote_identifier(name))
        .collect::<Vec<_>>()
        .join(", ");
    execute(
        connection,
        "create key index",
        &format!(
            "CREATE UNIQUE INDEX {} ON {} ({key_columns})",
            quote_identifier(&index),
            quote_identifier(table)
        ),
    )
}

pub(super) fn index_columns(connection: &Connection, index: &str) -> Result<Vec<String>, StoreError> {
    let query_error = |source| StoreError::Query {
        operation: "inspect existing index",
        source,
    };
    let mut statement = connection
        .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
        .map_err(query_error)?;
    statement
        .query_map([index], |row| row.get::<_, String>(0))
        .and_then(Iterator::collect::<Result<Vec<_>, _>>)
        .map_err(query_error)
}

fn existing_columns(connection: &Connection, table: &str) -> Result<Vec<String>, StoreError> {
    let mut statement = connection
        .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(|source| StoreError::Query {
            operation: "inspect existing table",
            source,
        })?;
    let names = statement
        .query_map([table], |row| row.get::<_, String>(0))
        .and_then(Iterator::collect::<Result<Vec<_>, _>>)
        .map_err(|source| StoreError::Query {
            operation: "inspect existing table",
            source,
        })?;
    Ok(names)
}

fn ensure_layout(schema: &RecordTypeSchema, existing: &[String]) -> Result<(), StoreError> {
    let declared: Vec<&str> = schema.columns().iter().map(|c| c.name.as_str()).collect();
    let matches = declared.len() == existing.len()
        && declared
            .iter()
            .zip(existing)
            .all(|(left, right)| left.eq_ignore_ascii_case(right));
    if matches {
        Ok(())
    } else {
        Err(StoreError::TableLayoutMismatch {
            table: schema.table_name().to_owned(),
            expected: declared.join(", "),
            found: existing.join(", "),
        })
    }
}

fn execute(connection: &Connection, operation: &'static str, sql: &str) -> Result<(), StoreError> {
    connection
        .execute(sql, [])
        .map(|_| ())
        .map_err(|source| StoreError::Query { operation, source })
}
