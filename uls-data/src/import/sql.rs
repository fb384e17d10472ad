//! Statement text and value binding for record-type loads.

use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, ValueRef};
use uls_core::{RecordTypeSchema, Value};

use crate::store::quote_identifier;

/// SQL used while loading one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct LoadStatements {
    pub(super) truncate: String,
    pub(super) insert: String,
    pub(super) strategy: Strategy,
}

/// How incoming rows meet rows already stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Strategy {
    /// The insert resolves key conflicts itself. `overwrites` is `true` when a
    /// conflicting key replaces the stored row.
    Upsert { overwrites: bool },
    /// Every row is appended.
    Append,
    /// Rows are grouped by the identifier column. The first row of a group
    /// either clears the stored group (`replace`) or, when the group is
    /// already stored, marks the whole group as kept.
    Group {
        column: usize,
        replace: bool,
        delete: String,
        exists: String,
    },
}

impl LoadStatements {
    /// Build statements for `schema`.
    ///
    /// Types with a declared key upsert: with `replace` set a conflicting key
    /// overwrites every non-key column, otherwise the stored row is left
    /// untouched. Key-less types append into a freshly cleared table during
    /// snapshots (`grouped == false`) and apply deltas per identifier.
    pub(super) fn new(schema: &RecordTypeSchema, replace: bool, grouped: bool) -> Self {
        let table = quote_identifier(schema.table_name());
        let columns: Vec<String> = schema
            .columns()
            .iter()
            .map(|column| quote_identifier(&column.name))
            .collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("?{n}")).collect();
        let insert = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        let truncate = format!("DELETE FROM {table}");

        if schema.has_key() {
            return Self {
                truncate,
                insert: format!("{insert} {}", upsert_clause(schema, replace)),
                strategy: Strategy::Upsert { overwrites: replace },
            };
        }

        let identifier = schema
            .identity_indices()
            .first()
            .copied()
            .zip(schema.identifier_column());
        let strategy = match identifier {
            Some((column, spec)) if grouped => {
                let name = quote_identifier(&spec.name);
                Strategy::Group {
                    column,
                    replace,
                    delete: format!("DELETE FROM {table} WHERE {name} = ?1"),
                    exists: format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE {name} = ?1)"),
                }
            }
            _ => Strategy::Append,
        };
        Self {
            truncate,
            insert,
            strategy,
        }
    }
}

fn upsert_clause(schema: &RecordTypeSchema, replace: bool) -> String {
    let keys: Vec<String> = schema
        .key_columns()
        .map(|column| quote_identifier(&column.name))
        .collect();
    let updates: Vec<String> = schema
        .columns()
        .iter()
        .enumerate()
        .filter(|(index, _)| !schema.key_indices().contains(index))
        .map(|(_, column)| {
            let name = quote_identifier(&column.name);
            format!("{name} = excluded.{name}")
        })
        .collect();
    let action = if replace && !updates.is_empty() {
        format!("DO UPDATE SET {}", updates.join(", "))
    } else {
        "DO NOTHING".to_owned()
    };
    format!("ON CONFLICT ({}) {action}", keys.join(", "))
}

/// Identity of a group value within one load.
pub(super) fn group_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(value) => Some(format!("i:{value}")),
        Value::Real(value) => Some(format!("r:{}", value.to_bits())),
        Value::Text(value) => Some(format!("t:{value}")),
    }
}

/// Borrowing adapter binding a [`Value`] as a statement parameter.
pub(crate) struct SqlValue<'a>(pub(crate) &'a Value);

impl ToSql for SqlValue<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(value) => ToSqlOutput::Borrowed(ValueRef::Integer(*value)),
            Value::Real(value) => ToSqlOutput::Borrowed(ValueRef::Real(*value)),
            Value::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
        })
    }
}
