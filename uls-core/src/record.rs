//! Rows as read from record files and as coerced against their schema.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::TypeCode;

/// One line of a record file split on the field delimiter.
///
/// Field values are kept verbatim; trimming and coercion happen in
/// [`crate::normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// Record type taken from the source file name.
    pub type_code: TypeCode,
    /// Name of the file the row came from.
    pub source: String,
    /// One-based line number within the file.
    pub line: u64,
    /// Field values in file order.
    pub fields: Vec<String>,
    /// Set when the row could not be read intact.
    pub defect: Option<RowDefect>,
}

impl RawRow {
    /// Split a decoded line into a row.
    ///
    /// # Examples
    /// ```
    /// use uls_core::{RawRow, TypeCode};
    ///
    /// let row = RawRow::from_line(TypeCode::new("HD"), "HD.dat", 1, "HD|1|W1AW|A");
    /// assert_eq!(row.fields, vec!["HD", "1", "W1AW", "A"]);
    /// assert!(row.defect.is_none());
    /// ```
    #[must_use]
    pub fn from_line(type_code: TypeCode, source: impl Into<String>, line: u64, text: &str) -> Self {
        Self {
            type_code,
            source: source.into(),
            line,
            fields: text.split('|').map(str::to_owned).collect(),
            defect: None,
        }
    }

    /// Row standing in for content the reader could not recover.
    #[must_use]
    pub fn corrupt(
        type_code: TypeCode,
        source: impl Into<String>,
        line: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_code,
            source: source.into(),
            line,
            fields: Vec::new(),
            defect: Some(RowDefect::CorruptEntry {
                message: message.into(),
            }),
        }
    }
}

/// Problems detected while reading a row from its archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowDefect {
    /// The archive entry failed to decompress or read.
    CorruptEntry {
        /// Reader error text.
        message: String,
    },
}

impl fmt::Display for RowDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CorruptEntry { message } => write!(f, "corrupt archive entry: {message}"),
        }
    }
}

/// A coerced field value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(untagged))]
pub enum Value {
    /// Empty or invalid field.
    Null,
    /// Whole number.
    Integer(i64),
    /// Fractional number.
    Real(f64),
    /// Text, including ISO formatted dates.
    Text(String),
}

impl Value {
    /// Whether the value is [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the text payload, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// What went wrong with a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldIssueKind {
    /// Value could not be parsed as a whole number.
    NotInteger,
    /// Value could not be parsed as a number.
    NotNumeric,
    /// Value is not a recognised date.
    InvalidDate,
    /// Text is longer than the declared width.
    TooWide,
    /// Column declared `not null` but the field is empty.
    MissingRequired,
    /// The `record_type` marker disagrees with the file's type code.
    MarkerMismatch,
}

impl FieldIssueKind {
    /// Whether the issue invalidates the value.
    ///
    /// Invalidating issues store the field as null (or reject the record,
    /// depending on policy); the others only annotate it.
    #[must_use]
    pub const fn invalidates_value(self) -> bool {
        matches!(self, Self::NotInteger | Self::NotNumeric | Self::InvalidDate)
    }
}

/// A problem with one field of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    /// Column the field belongs to.
    pub column: String,
    /// Field text as read.
    pub raw: String,
    /// Problem category.
    pub kind: FieldIssueKind,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.kind {
            FieldIssueKind::NotInteger => "is not an integer",
            FieldIssueKind::NotNumeric => "is not numeric",
            FieldIssueKind::InvalidDate => "is not a valid date",
            FieldIssueKind::TooWide => "exceeds the declared width",
            FieldIssueKind::MissingRequired => "is required but empty",
            FieldIssueKind::MarkerMismatch => "does not match the file's record type",
        };
        write!(f, "{} value '{}' {reason}", self.column, self.raw)
    }
}

/// Annotations attached to a normalized row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowWarning {
    /// Field count differs from the schema's column count.
    WidthMismatch {
        /// Columns declared by the schema.
        expected: usize,
        /// Fields found on the line.
        actual: usize,
    },
    /// A single field had a problem.
    Field(FieldIssue),
    /// A key or identifier column is empty.
    MissingKey {
        /// Column left empty.
        column: String,
    },
    /// The reader could not recover the row.
    Defect(RowDefect),
}

impl fmt::Display for RowWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WidthMismatch { expected, actual } => {
                write!(f, "expected {expected} fields, found {actual}")
            }
            Self::Field(issue) => issue.fmt(f),
            Self::MissingKey { column } => write!(f, "key column {column} is empty"),
            Self::Defect(defect) => defect.fmt(f),
        }
    }
}

/// A row whose fields are coerced to the schema's column types.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRecord {
    /// Record type the row belongs to.
    pub type_code: TypeCode,
    /// One value per schema column, in column order.
    pub values: Vec<Value>,
    /// `false` when the row must not be loaded.
    pub valid: bool,
    /// Everything the normalizer noticed.
    pub warnings: Vec<RowWarning>,
}

impl TypedRecord {
    /// Whether any field was invalid and stored as null.
    #[must_use]
    pub fn has_invalid_fields(&self) -> bool {
        self.warnings.iter().any(|warning| {
            matches!(warning, RowWarning::Field(issue) if issue.kind.invalidates_value())
        })
    }
}
