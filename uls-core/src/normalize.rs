//! Coerce raw rows into typed records.
//!
//! Normalization never fails: every problem is recorded on the returned
//! [`TypedRecord`] and the caller decides whether to load or reject it.

use chrono::NaiveDate;
use log::trace;

use crate::{
    ColumnSpec, ColumnType, FieldIssue, FieldIssueKind, RawRow, RecordTypeSchema, RowWarning,
    TypedRecord, Value,
};

const DATE_FORMATS: [&str; 2] = ["%m/%d/%Y", "%Y-%m-%d"];

/// Validate and coerce `row` against `schema`.
///
/// Values are trimmed and empty fields become [`Value::Null`]. Rows with more
/// fields than columns, rows with an empty key or identifier column, and rows the reader
/// marked defective come back with `valid == false`. Rows with fewer fields
/// than columns are padded with nulls and flagged with a width warning.
///
/// # Examples
/// ```
/// use uls_core::{normalize, RawRow, SchemaRegistry, TypeCode, Value};
///
/// let registry = SchemaRegistry::load(
///     "create table PUBACC_HD (record_type char(2), id int not null, call_sign char(10))",
/// )?;
/// let schema = registry.get(&TypeCode::new("HD")).expect("declared");
/// let row = RawRow::from_line(TypeCode::new("HD"), "HD.dat", 1, "HD| 42 |W1AW");
/// let record = normalize(&row, schema);
/// assert!(record.valid);
/// assert_eq!(record.values[1], Value::Integer(42));
/// # Ok::<(), uls_core::SchemaError>(())
/// ```
#[must_use]
pub fn normalize(row: &RawRow, schema: &RecordTypeSchema) -> TypedRecord {
    let mut record = TypedRecord {
        type_code: schema.type_code().clone(),
        values: vec![Value::Null; schema.width()],
        valid: true,
        warnings: Vec::new(),
    };

    if let Some(defect) = &row.defect {
        record.valid = false;
        record.warnings.push(RowWarning::Defect(defect.clone()));
        return record;
    }

    let expected = schema.width();
    let actual = row.fields.len();
    if actual != expected {
        record
            .warnings
            .push(RowWarning::WidthMismatch { expected, actual });
        if actual > expected {
            trace!(
                "{}:{} has {actual} fields for {expected} columns",
                row.source, row.line
            );
            record.valid = false;
            return record;
        }
    }

    for (index, (column, raw)) in schema.columns().iter().zip(&row.fields).enumerate() {
        let (value, issue) = coerce(column, raw);
        if let Some(slot) = record.values.get_mut(index) {
            *slot = value;
        }
        if let Some(kind) = issue {
            record.warnings.push(field_warning(column, raw, kind));
        }
    }

    for (column, value) in schema.columns().iter().zip(&record.values) {
        if value.is_null() && !column.nullable && !is_identity(schema, &column.name) {
            let raw = String::new();
            record
                .warnings
                .push(field_warning(column, &raw, FieldIssueKind::MissingRequired));
        }
    }

    if schema.has_marker_column() {
        if let Some(marker) = record.values.first().and_then(Value::as_text) {
            if !marker.eq_ignore_ascii_case(schema.type_code().as_str()) {
                let marker = marker.to_owned();
                if let Some(column) = schema.columns().first() {
                    record
                        .warnings
                        .push(field_warning(column, &marker, FieldIssueKind::MarkerMismatch));
                }
            }
        }
    }

    for index in schema.identity_indices() {
        let missing = record.values.get(*index).is_none_or(Value::is_null);
        if missing {
            let column = schema
                .columns()
                .get(*index)
                .map(|column| column.name.clone())
                .unwrap_or_default();
            record.valid = false;
            record.warnings.push(RowWarning::MissingKey { column });
        }
    }

    record
}

fn is_identity(schema: &RecordTypeSchema, name: &str) -> bool {
    schema
        .identity_indices()
        .iter()
        .filter_map(|index| schema.columns().get(*index))
        .any(|column| column.name == name)
}

fn field_warning(column: &ColumnSpec, raw: &str, kind: FieldIssueKind) -> RowWarning {
    RowWarning::Field(FieldIssue {
        column: column.name.clone(),
        raw: raw.to_owned(),
        kind,
    })
}

fn coerce(column: &ColumnSpec, raw: &str) -> (Value, Option<FieldIssueKind>) {
    let text = raw.trim();
    if text.is_empty() {
        return (Value::Null, None);
    }
    match column.column_type {
        ColumnType::Text => {
            let too_wide = column
                .max_width
                .is_some_and(|width| text.chars().count() > width as usize);
            (
                Value::Text(text.to_owned()),
                too_wide.then_some(FieldIssueKind::TooWide),
            )
        }
        ColumnType::Integer => coerce_integer(text),
        ColumnType::Real => match text.parse::<f64>() {
            Ok(value) if value.is_finite() => (Value::Real(value), None),
            _ => (Value::Null, Some(FieldIssueKind::NotNumeric)),
        },
        ColumnType::Date => DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
            .map_or((Value::Null, Some(FieldIssueKind::InvalidDate)), |date| {
                (Value::Text(date.format("%Y-%m-%d").to_string()), None)
            }),
    }
}

/// Whole numbers sometimes arrive as `123.0` from upstream exports.
fn coerce_integer(text: &str) -> (Value, Option<FieldIssueKind>) {
    if let Ok(value) = text.parse::<i64>() {
        return (Value::Integer(value), None);
    }
    let whole = text
        .split_once('.')
        .filter(|(_, fraction)| !fraction.is_empty() && fraction.bytes().all(|b| b == b'0'))
        .and_then(|(integer, _)| integer.parse::<i64>().ok());
    match whole {
        Some(value) => (Value::Integer(value), None),
        None => (Value::Null, Some(FieldIssueKind::NotInteger)),
    }
}
