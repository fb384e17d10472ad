//! Read-only queries over loaded record-type tables.
//!
//! Lookups are keyed by natural identifiers: call sign, system identifier
//! and entity name fragments. Column names come from the installed schema
//! document, so queries follow whatever layout the store was initialised
//! with. Nothing here writes.

use std::collections::BTreeMap;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, params_from_iter};
use thiserror::Error;
use uls_core::{RecordTypeSchema, SchemaRegistry, TypeCode, Value};

use crate::import::SqlValue;
use crate::store::{StoreError, load_registry, quote_identifier};

const HEADER_TYPE: &str = "HD";
const ENTITY_TYPE: &str = "EN";
const CALL_SIGN_COLUMNS: [&str; 2] = ["call_sign", "callsign"];
const SYSTEM_IDENTIFIER_COLUMN: &str = "unique_system_identifier";
const ENTITY_NAME_COLUMN: &str = "entity_name";

/// One stored record, keyed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupRow {
    /// Record type the row was read from.
    pub type_code: TypeCode,
    /// Column values in declaration order of the table.
    pub values: BTreeMap<String, Value>,
}

impl LookupRow {
    /// Value of `column`, if the table declares it.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }
}

/// Errors raised by lookups.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The store has no schema for the requested record type.
    #[error("record type {type_code} is not defined in the store")]
    UnknownRecordType {
        /// Requested type.
        type_code: TypeCode,
    },
    /// The record type does not declare the requested column.
    #[error("record type {type_code} has no column {column}")]
    UnknownColumn {
        /// Record type queried.
        type_code: TypeCode,
        /// Requested column.
        column: String,
    },
    /// A lookup query failed.
    #[error("failed to {operation}")]
    Query {
        /// Operation being attempted.
        operation: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// The schema document could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Query surface for the external lookup service.
#[derive(Debug)]
pub struct Lookup<'a> {
    connection: &'a Connection,
    registry: SchemaRegistry,
}

impl<'a> Lookup<'a> {
    /// Bind to a connection, reading the installed schema document.
    pub fn new(connection: &'a Connection) -> Result<Self, LookupError> {
        let registry = load_registry(connection)?.ok_or(StoreError::SchemaNotInitialised)?;
        Ok(Self {
            connection,
            registry,
        })
    }

    /// License headers whose call sign matches `call_sign`, ignoring case
    /// and surrounding whitespace.
    pub fn by_call_sign(&self, call_sign: &str) -> Result<Vec<LookupRow>, LookupError> {
        let type_code = TypeCode::new(HEADER_TYPE);
        let schema = self.schema(&type_code)?;
        let column = CALL_SIGN_COLUMNS
            .iter()
            .find_map(|name| schema.column_index(name))
            .and_then(|index| schema.columns().get(index))
            .ok_or_else(|| LookupError::UnknownColumn {
                type_code: type_code.clone(),
                column: "call_sign".to_owned(),
            })?;
        let sql = format!(
            "{} WHERE {} = ?1 COLLATE NOCASE",
            select_all(schema),
            quote_identifier(&column.name)
        );
        self.query(
            schema,
            &sql,
            &[Value::Text(call_sign.trim().to_owned())],
            "look up call sign",
        )
    }

    /// Records of `type_code` belonging to one system identifier.
    ///
    /// Uses `unique_system_identifier` when the type declares it, otherwise
    /// the type's identifier column.
    pub fn by_system_identifier(
        &self,
        type_code: &TypeCode,
        identifier: i64,
    ) -> Result<Vec<LookupRow>, LookupError> {
        let schema = self.schema(type_code)?;
        let column = schema
            .column_index(SYSTEM_IDENTIFIER_COLUMN)
            .and_then(|index| schema.columns().get(index))
            .or_else(|| schema.identifier_column())
            .ok_or_else(|| LookupError::UnknownColumn {
                type_code: type_code.clone(),
                column: SYSTEM_IDENTIFIER_COLUMN.to_owned(),
            })?;
        let sql = format!(
            "{} WHERE {} = ?1",
            select_all(schema),
            quote_identifier(&column.name)
        );
        self.query(
            schema,
            &sql,
            &[Value::Integer(identifier)],
            "look up system identifier",
        )
    }

    /// Entities whose name contains `fragment`, ignoring ASCII case.
    pub fn entity_name_contains(
        &self,
        fragment: &str,
        limit: usize,
    ) -> Result<Vec<LookupRow>, LookupError> {
        let type_code = TypeCode::new(ENTITY_TYPE);
        let schema = self.schema(&type_code)?;
        if schema.column_index(ENTITY_NAME_COLUMN).is_none() {
            return Err(LookupError::UnknownColumn {
                type_code,
                column: ENTITY_NAME_COLUMN.to_owned(),
            });
        }
        let pattern = format!("%{}%", escape_like(fragment.trim()));
        let sql = format!(
            "{} WHERE {} LIKE ?1 ESCAPE '\\' ORDER BY rowid LIMIT ?2",
            select_all(schema),
            quote_identifier(ENTITY_NAME_COLUMN)
        );
        self.query(
            schema,
            &sql,
            &[
                Value::Text(pattern),
                Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)),
            ],
            "search entity names",
        )
    }

    /// Records of `type_code` whose `column` equals `value`.
    pub fn by_column(
        &self,
        type_code: &TypeCode,
        column: &str,
        value: &Value,
    ) -> Result<Vec<LookupRow>, LookupError> {
        let schema = self.schema(type_code)?;
        let spec = schema
            .column_index(column)
            .and_then(|index| schema.columns().get(index))
            .ok_or_else(|| LookupError::UnknownColumn {
                type_code: type_code.clone(),
                column: column.to_owned(),
            })?;
        let sql = format!(
            "{} WHERE {} = ?1",
            select_all(schema),
            quote_identifier(&spec.name)
        );
        self.query(
            schema,
            &sql,
            std::slice::from_ref(value),
            "look up column value",
        )
    }

    fn schema(&self, type_code: &TypeCode) -> Result<&RecordTypeSchema, LookupError> {
        self.registry
            .get(type_code)
            .ok_or_else(|| LookupError::UnknownRecordType {
                type_code: type_code.clone(),
            })
    }

    fn query(
        &self,
        schema: &RecordTypeSchema,
        sql: &str,
        params: &[Value],
        operation: &'static str,
    ) -> Result<Vec<LookupRow>, LookupError> {
        let map_err = |source| LookupError::Query { operation, source };
        let mut statement = self.connection.prepare(sql).map_err(map_err)?;
        let rows = statement
            .query_map(params_from_iter(params.iter().map(SqlValue)), |row| {
                let mut values = BTreeMap::new();
                for (index, column) in schema.columns().iter().enumerate() {
                    values.insert(column.name.clone(), from_sql(row.get_ref(index)?));
                }
                Ok(LookupRow {
                    type_code: schema.type_code().clone(),
                    values,
                })
            })
            .and_then(Iterator::collect::<Result<Vec<_>, _>>)
            .map_err(map_err)?;
        Ok(rows)
    }
}

fn select_all(schema: &RecordTypeSchema) -> String {
    let columns = schema
        .columns()
        .iter()
        .map(|column| quote_identifier(&column.name))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {columns} FROM {}",
        quote_identifier(schema.table_name())
    )
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::Integer(value),
        ValueRef::Real(value) => Value::Real(value),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn escape_like(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len());
    for ch in fragment.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
