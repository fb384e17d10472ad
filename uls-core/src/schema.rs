//! Record-type schemas parsed from the upstream data definition document.
//!
//! The document is the SQL Server flavoured DDL published alongside the
//! public access files: a sequence of `create table` statements separated by
//! `go` lines or semicolons. Every table becomes one [`RecordTypeSchema`]
//! keyed by its [`TypeCode`] (the table name without the `PUBACC_` prefix).
//! Parsing is pure; creating tables from the registry happens in the store.

use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TABLE_PREFIX: &str = "PUBACC_";
const MARKER_COLUMN: &str = "record_type";
const IDENTIFIER_COLUMN: &str = "unique_system_identifier";
const RECORD_FILE_EXTENSION: &str = "dat";

/// Short code naming a record type (for example `HD` or `EN`).
///
/// Codes are stored upper-cased so file names and schema documents can
/// disagree on case without producing distinct types.
///
/// # Examples
/// ```
/// use uls_core::TypeCode;
///
/// assert_eq!(TypeCode::new("hd").as_str(), "HD");
/// assert_eq!(TypeCode::from_file_name("l_amat/EN.dat"), Some(TypeCode::new("EN")));
/// assert_eq!(TypeCode::from_file_name("counts.txt"), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct TypeCode(String);

impl TypeCode {
    /// Construct a code, trimming whitespace and upper-casing ASCII letters.
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_ascii_uppercase())
    }

    /// Derive the code from a record file name such as `HD.dat`.
    ///
    /// Directory components are ignored. Returns `None` when the name does not
    /// carry the `.dat` extension or the stem is not a plain identifier.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let (stem, extension) = base.rsplit_once('.')?;
        if !extension.eq_ignore_ascii_case(RECORD_FILE_EXTENSION) {
            return None;
        }
        if stem.is_empty() || !stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        Some(Self::new(stem))
    }

    /// Borrow the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for TypeCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage class a column's values are coerced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ColumnType {
    /// Free text (`char`, `varchar`).
    Text,
    /// Whole numbers (`int`, `tinyint`, `smallint`, `bigint`, `numeric(p,0)`).
    Integer,
    /// Fractional numbers (`numeric(p,s)` with `s > 0`, `money`, `float`).
    Real,
    /// Calendar dates (`datetime`, `date`), stored as ISO `yyyy-mm-dd`.
    Date,
}

impl ColumnType {
    /// SQLite type affinity used when creating the column.
    #[must_use]
    pub const fn sql_affinity(self) -> &'static str {
        match self {
            Self::Text | Self::Date => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
        }
    }
}

/// One declared column of a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ColumnSpec {
    /// Column name as declared in the schema document.
    pub name: String,
    /// Coercion target for field values.
    pub column_type: ColumnType,
    /// Maximum character width for text columns, when declared.
    pub max_width: Option<u32>,
    /// Whether the document allows the column to be empty.
    pub nullable: bool,
}

/// Immutable description of one record type and its target table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecordTypeSchema {
    type_code: TypeCode,
    table_name: String,
    columns: Vec<ColumnSpec>,
    key_indices: Vec<usize>,
    identity_indices: Vec<usize>,
}

impl RecordTypeSchema {
    /// Validate and construct a schema.
    ///
    /// `key` is the declared natural key. Without one, the type has no unique
    /// key and its rows are grouped by an identifier column instead:
    /// `unique_system_identifier` when declared, otherwise the first column
    /// that is not the `record_type` marker.
    ///
    /// # Examples
    /// ```
    /// use uls_core::{ColumnSpec, ColumnType, RecordTypeSchema, TypeCode};
    ///
    /// let column = |name: &str| ColumnSpec {
    ///     name: name.into(),
    ///     column_type: ColumnType::Text,
    ///     max_width: None,
    ///     nullable: true,
    /// };
    /// let schema = RecordTypeSchema::new(
    ///     TypeCode::new("HD"),
    ///     "HD",
    ///     vec![column("system_id"), column("call_sign")],
    ///     None,
    /// )?;
    /// assert!(!schema.has_key());
    /// assert_eq!(schema.identifier_column().map(|c| c.name.as_str()), Some("system_id"));
    /// # Ok::<(), uls_core::SchemaError>(())
    /// ```
    pub fn new(
        type_code: TypeCode,
        table_name: impl Into<String>,
        columns: Vec<ColumnSpec>,
        key: Option<Vec<String>>,
    ) -> Result<Self, SchemaError> {
        let table_name = table_name.into();
        ensure_identifier(&table_name, &table_name)?;
        if columns.is_empty() {
            return Err(SchemaError::MissingColumnList { table: table_name });
        }
        for (position, column) in columns.iter().enumerate() {
            ensure_identifier(&table_name, &column.name)?;
            let duplicate = columns
                .iter()
                .take(position)
                .any(|earlier| earlier.name.eq_ignore_ascii_case(&column.name));
            if duplicate {
                return Err(SchemaError::DuplicateColumn {
                    table: table_name,
                    column: column.name.clone(),
                });
            }
        }

        let key_indices = key
            .unwrap_or_default()
            .iter()
            .map(|name| {
                columns
                    .iter()
                    .position(|column| column.name.eq_ignore_ascii_case(name))
                    .ok_or_else(|| SchemaError::UnknownKeyColumn {
                        table: table_name.clone(),
                        column: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let identity_indices = if key_indices.is_empty() {
            let identifier = columns
                .iter()
                .position(|column| column.name.eq_ignore_ascii_case(IDENTIFIER_COLUMN))
                .or_else(|| {
                    columns
                        .iter()
                        .position(|column| !column.name.eq_ignore_ascii_case(MARKER_COLUMN))
                })
                .ok_or_else(|| SchemaError::MissingColumnList {
                    table: table_name.clone(),
                })?;
            vec![identifier]
        } else {
            key_indices.clone()
        };

        Ok(Self {
            type_code,
            table_name,
            columns,
            key_indices,
            identity_indices,
        })
    }

    /// Code identifying this record type.
    #[must_use]
    pub fn type_code(&self) -> &TypeCode {
        &self.type_code
    }

    /// Name of the table holding records of this type.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Declared columns in source-field order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Number of fields a row of this type carries.
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Positions of the declared natural key columns; empty when the document
    /// declares no key.
    #[must_use]
    pub fn key_indices(&self) -> &[usize] {
        &self.key_indices
    }

    /// Declared natural key columns in key order.
    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnSpec> + '_ {
        self.key_indices
            .iter()
            .filter_map(|index| self.columns.get(*index))
    }

    /// Whether the document declares a unique natural key for this type.
    #[must_use]
    pub fn has_key(&self) -> bool {
        !self.key_indices.is_empty()
    }

    /// Columns every loadable row must fill: the natural key, or the
    /// identifier column when no key is declared.
    #[must_use]
    pub fn identity_indices(&self) -> &[usize] {
        &self.identity_indices
    }

    /// Column naming the license a row belongs to.
    ///
    /// This is the first key column, or the identifier column of a key-less
    /// type. Daily imports of key-less types replace rows per identifier.
    #[must_use]
    pub fn identifier_column(&self) -> Option<&ColumnSpec> {
        self.identity_indices
            .first()
            .and_then(|index| self.columns.get(*index))
    }

    /// Position of the named column, compared case-insensitively.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
    }

    /// Whether the first column repeats the record type code on every row.
    #[must_use]
    pub fn has_marker_column(&self) -> bool {
        self.columns
            .first()
            .is_some_and(|column| column.name.eq_ignore_ascii_case(MARKER_COLUMN))
    }
}

/// All record types known to the importer, keyed by [`TypeCode`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    types: BTreeMap<TypeCode, RecordTypeSchema>,
}

impl SchemaRegistry {
    /// Parse a schema definition document.
    ///
    /// Statements other than `create table` are ignored. Loading the same
    /// document twice yields equal registries.
    ///
    /// # Examples
    /// ```
    /// use uls_core::{SchemaRegistry, TypeCode};
    ///
    /// let document = "
    /// create table dbo.PUBACC_HD
    /// (
    ///     record_type               char(2)     not null,
    ///     unique_system_identifier  numeric(9,0) not null,
    ///     call_sign                 char(10)    null
    /// )
    /// go
    /// ";
    /// let registry = SchemaRegistry::load(document)?;
    /// let header = registry.get(&TypeCode::new("HD")).expect("HD is declared");
    /// assert_eq!(header.table_name(), "PUBACC_HD");
    /// assert_eq!(header.width(), 3);
    /// # Ok::<(), uls_core::SchemaError>(())
    /// ```
    pub fn load(document: &str) -> Result<Self, SchemaError> {
        let mut types = BTreeMap::new();
        for (index, statement) in split_statements(document).iter().enumerate() {
            let Some(schema) = parse_statement(statement, index + 1)? else {
                continue;
            };
            let code = schema.type_code().clone();
            if types.contains_key(&code) {
                return Err(SchemaError::DuplicateTypeCode { type_code: code });
            }
            types.insert(code, schema);
        }
        if types.is_empty() {
            return Err(SchemaError::NoRecordTypes);
        }
        Ok(Self { types })
    }

    /// Look up a record type.
    #[must_use]
    pub fn get(&self, type_code: &TypeCode) -> Option<&RecordTypeSchema> {
        self.types.get(type_code)
    }

    /// Iterate record types in code order.
    pub fn iter(&self) -> impl Iterator<Item = &RecordTypeSchema> + '_ {
        self.types.values()
    }

    /// Number of record types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the registry holds no record types.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Errors raised while parsing a schema definition document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The document declared no tables at all.
    #[error("schema document does not declare any record types")]
    NoRecordTypes,
    /// A `create table` statement could not be parsed.
    #[error("statement {statement}: {message}")]
    Syntax {
        /// One-based statement position in the document.
        statement: usize,
        /// Description of the problem.
        message: String,
    },
    /// A table declared no columns.
    #[error("table {table} does not declare a column list")]
    MissingColumnList {
        /// Table being parsed.
        table: String,
    },
    /// Two tables map to the same type code.
    #[error("record type {type_code} is declared more than once")]
    DuplicateTypeCode {
        /// Code declared twice.
        type_code: TypeCode,
    },
    /// A table declared the same column twice.
    #[error("table {table} declares column {column} more than once")]
    DuplicateColumn {
        /// Table being parsed.
        table: String,
        /// Repeated column.
        column: String,
    },
    /// A column used a type the importer cannot coerce.
    #[error("table {table} column {column} has unsupported type '{declared}'")]
    UnsupportedColumnType {
        /// Table being parsed.
        table: String,
        /// Offending column.
        column: String,
        /// Declared type text.
        declared: String,
    },
    /// The primary key referenced a column the table does not declare.
    #[error("table {table} key references unknown column {column}")]
    UnknownKeyColumn {
        /// Table being parsed.
        table: String,
        /// Missing column.
        column: String,
    },
    /// A table or column name is not a plain SQL identifier.
    #[error("table {table} uses invalid identifier '{identifier}'")]
    InvalidIdentifier {
        /// Table being parsed.
        table: String,
        /// Rejected identifier.
        identifier: String,
    },
}

fn ensure_identifier(table: &str, identifier: &str) -> Result<(), SchemaError> {
    let mut chars = identifier.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier {
            table: table.to_owned(),
            identifier: identifier.to_owned(),
        })
    }
}

fn split_statements(document: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    for raw_line in document.lines() {
        let line = raw_line
            .split_once("--")
            .map_or(raw_line, |(code, _comment)| code);
        if line.trim().eq_ignore_ascii_case("go") {
            statements.push(std::mem::take(&mut current));
            continue;
        }
        for (position, piece) in line.split(';').enumerate() {
            if position > 0 {
                statements.push(std::mem::take(&mut current));
            }
            current.push_str(piece);
        }
        current.push('\n');
    }
    statements.push(current);
    statements
        .into_iter()
        .map(|statement| statement.trim().to_owned())
        .filter(|statement| !statement.is_empty())
        .collect()
}

fn parse_statement(statement: &str, position: usize) -> Result<Option<RecordTypeSchema>, SchemaError> {
    let mut words = statement.split_whitespace();
    let is_create_table = words
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case("create"))
        && words
            .next()
            .is_some_and(|word| word.to_ascii_lowercase().starts_with("table"));
    if !is_create_table {
        return Ok(None);
    }

    let lower = statement.to_ascii_lowercase();
    let Some(table_start) = lower.find("table").map(|index| index + "table".len()) else {
        return Ok(None);
    };
    let remainder = statement.get(table_start..).unwrap_or_default();
    let (raw_name, body) = match remainder.find('(') {
        Some(open) => (
            remainder.get(..open).unwrap_or_default(),
            Some(remainder.get(open..).unwrap_or_default()),
        ),
        None => (remainder, None),
    };
    let table_name = clean_identifier(raw_name.trim().rsplit('.').next().unwrap_or(raw_name));
    if table_name.is_empty() {
        return Err(SchemaError::Syntax {
            statement: position,
            message: "create table statement is missing a table name".to_owned(),
        });
    }
    let Some(body) = body else {
        return Err(SchemaError::MissingColumnList { table: table_name });
    };
    let inner = enclosed_body(body).ok_or_else(|| SchemaError::Syntax {
        statement: position,
        message: format!("unbalanced parentheses in table {table_name}"),
    })?;

    let mut columns = Vec::new();
    let mut key = None;
    for item in split_top_level(inner) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        match classify_item(item) {
            TableItem::PrimaryKey(names) => key = Some(names),
            TableItem::Constraint => {}
            TableItem::Column => {
                let (column, inline_key) = parse_column(&table_name, item)?;
                if inline_key {
                    key = Some(vec![column.name.clone()]);
                }
                columns.push(column);
            }
        }
    }

    let type_code = TypeCode::new(
        table_name
            .strip_prefix(TABLE_PREFIX)
            .or_else(|| table_name.strip_prefix(&TABLE_PREFIX.to_ascii_lowercase()))
            .unwrap_or(&table_name),
    );
    RecordTypeSchema::new(type_code, table_name, columns, key).map(Some)
}

fn clean_identifier(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| matches!(c, '[' | ']' | '"' | '`'))
        .to_owned()
}

fn enclosed_body(body: &str) -> Option<&str> {
    let mut depth = 0usize;
    for (index, character) in body.char_indices() {
        match character {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return body.get(1..index);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(body: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (index, character) in body.char_indices() {
        match character {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(body.get(start..index).unwrap_or_default());
                start = index + 1;
            }
            _ => {}
        }
    }
    items.push(body.get(start..).unwrap_or_default());
    items
}

enum TableItem {
    PrimaryKey(Vec<String>),
    Constraint,
    Column,
}

fn classify_item(item: &str) -> TableItem {
    let lower = item.to_ascii_lowercase();
    let first = lower.split_whitespace().next().unwrap_or_default();
    let is_table_constraint = matches!(
        first,
        "constraint" | "primary" | "unique" | "foreign" | "check" | "index" | "key"
    );
    if !is_table_constraint {
        return TableItem::Column;
    }
    if let Some(offset) = lower.find("primary key") {
        let columns = item
            .get(offset..)
            .and_then(|tail| {
                let open = tail.find('(')?;
                let close = tail.find(')')?;
                tail.get(open + 1..close)
            })
            .map(|list| {
                list.split(',')
                    .map(clean_identifier)
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        return TableItem::PrimaryKey(columns);
    }
    TableItem::Constraint
}

fn parse_column(table: &str, item: &str) -> Result<(ColumnSpec, bool), SchemaError> {
    let name_end = item
        .find(char::is_whitespace)
        .unwrap_or(item.len());
    let name = clean_identifier(item.get(..name_end).unwrap_or_default());
    let rest = item.get(name_end..).unwrap_or_default().trim_start();

    let type_end = type_token_end(rest);
    let declared = rest
        .get(..type_end)
        .unwrap_or_default()
        .split_whitespace()
        .collect::<String>();
    let modifiers = rest.get(type_end..).unwrap_or_default().to_ascii_lowercase();

    if declared.is_empty() {
        return Err(SchemaError::UnsupportedColumnType {
            table: table.to_owned(),
            column: name,
            declared,
        });
    }
    let (column_type, max_width) =
        map_declared_type(&declared).ok_or_else(|| SchemaError::UnsupportedColumnType {
            table: table.to_owned(),
            column: name.clone(),
            declared: declared.clone(),
        })?;
    let inline_key = modifiers.contains("primary key");
    let nullable = !modifiers.contains("not null") && !inline_key;

    Ok((
        ColumnSpec {
            name,
            column_type,
            max_width,
            nullable,
        },
        inline_key,
    ))
}

/// Length of the type token, including a parenthesised argument list that
/// may be separated from the type name by whitespace.
fn type_token_end(rest: &str) -> usize {
    let word_end = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(rest.len());
    let after_word = rest.get(word_end..).unwrap_or_default();
    let trimmed = after_word.trim_start();
    if trimmed.starts_with('(') {
        let skipped = after_word.len() - trimmed.len();
        if let Some(close) = trimmed.find(')') {
            return word_end + skipped + close + 1;
        }
    }
    word_end
}

fn map_declared_type(declared: &str) -> Option<(ColumnType, Option<u32>)> {
    let lower = declared.to_ascii_lowercase();
    let (base, arguments) = match lower.split_once('(') {
        Some((base, tail)) => (base.trim(), Some(tail.trim_end_matches(')'))),
        None => (lower.as_str(), None),
    };
    let numeric_arguments = || {
        arguments
            .map(|list| {
                list.split(',')
                    .map(|part| part.trim().parse::<u32>().ok())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    };
    match base {
        "char" | "varchar" | "nchar" | "nvarchar" | "text" => {
            let width = numeric_arguments().first().copied().flatten();
            Some((ColumnType::Text, width))
        }
        "int" | "integer" | "tinyint" | "smallint" | "bigint" => Some((ColumnType::Integer, None)),
        "numeric" | "decimal" => {
            let scale = numeric_arguments().get(1).copied().flatten().unwrap_or(0);
            if scale == 0 {
                Some((ColumnType::Integer, None))
            } else {
                Some((ColumnType::Real, None))
            }
        }
        "money" | "smallmoney" | "float" | "real" => Some((ColumnType::Real, None)),
        "datetime" | "smalldatetime" | "date" => Some((ColumnType::Date, None)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const HEADER_DOCUMENT: &str = "
-- header records
create table dbo.PUBACC_HD
(
      record_type               char(2)              not null,
      unique_system_identifier  numeric(9,0)         not null,
      call_sign                 char(10)             null,
      license_status            char(1)              null,
      grant_date                datetime             null,
      lat_seconds               numeric(3,1)         null
)
go

create table dbo.PUBACC_EN
(
      record_type               char(2)              not null,
      unique_system_identifier  numeric(9,0)         not null,
      entity_type               char(2)              null,
      entity_name               varchar(200)         null,
      primary key (unique_system_identifier, entity_type)
)
go
";

    #[rstest]
    fn parses_tables_columns_and_types() {
        let registry = SchemaRegistry::load(HEADER_DOCUMENT).expect("document parses");
        assert_eq!(registry.len(), 2);

        let header = registry.get(&TypeCode::new("HD")).expect("HD present");
        assert_eq!(header.table_name(), "PUBACC_HD");
        let kinds: Vec<_> = header.columns().iter().map(|c| c.column_type).collect();
        assert_eq!(
            kinds,
            vec![
                ColumnType::Text,
                ColumnType::Integer,
                ColumnType::Text,
                ColumnType::Text,
                ColumnType::Date,
                ColumnType::Real,
            ]
        );
        assert_eq!(header.columns().get(2).and_then(|c| c.max_width), Some(10));
        assert!(!header.columns().first().is_some_and(|c| c.nullable));
        assert!(header.has_marker_column());
        assert!(!header.has_key());
        assert_eq!(header.identity_indices(), &[1]);
    }

    #[rstest]
    fn honours_declared_primary_key() {
        let registry = SchemaRegistry::load(HEADER_DOCUMENT).expect("document parses");
        let entity = registry.get(&TypeCode::new("EN")).expect("EN present");
        let keys: Vec<_> = entity.key_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(keys, vec!["unique_system_identifier", "entity_type"]);
        assert!(entity.has_key());
        assert_eq!(entity.identity_indices(), entity.key_indices());
        assert_eq!(entity.width(), 4, "constraint lines are not columns");
    }

    #[rstest]
    fn keyless_types_group_by_system_identifier() {
        let registry = SchemaRegistry::load(
            "create table dbo.PUBACC_HS (
                record_type char(2) not null,
                uls_file_number char(14) null,
                unique_system_identifier numeric(9,0) not null,
                callsign char(10) null,
                log_date char(10) null,
                code char(6) null
            )",
        )
        .expect("document parses");
        let history = registry.get(&TypeCode::new("HS")).expect("HS present");
        assert!(!history.has_key());
        assert_eq!(
            history.identifier_column().map(|c| c.name.as_str()),
            Some("unique_system_identifier")
        );
    }

    #[rstest]
    fn loading_twice_is_idempotent() {
        let first = SchemaRegistry::load(HEADER_DOCUMENT).expect("first load");
        let second = SchemaRegistry::load(HEADER_DOCUMENT).expect("second load");
        assert_eq!(first, second);
    }

    #[rstest]
    fn accepts_semicolon_separated_plain_tables() {
        let registry = SchemaRegistry::load(
            "CREATE TABLE HD (system_id int not null, call_sign char(10), status char(1));",
        )
        .expect("document parses");
        let header = registry.get(&TypeCode::new("HD")).expect("HD present");
        assert_eq!(header.table_name(), "HD");
        assert!(!header.has_marker_column());
        assert!(header.key_indices().is_empty());
        assert_eq!(header.identity_indices(), &[0]);
    }

    #[rstest]
    fn rejects_duplicate_type_codes() {
        let document = "create table PUBACC_HD (a int)\ngo\ncreate table HD (b int)\ngo\n";
        let err = SchemaRegistry::load(document).expect_err("duplicate must fail");
        assert_eq!(
            err,
            SchemaError::DuplicateTypeCode {
                type_code: TypeCode::new("HD")
            }
        );
    }

    #[rstest]
    #[case("create table PUBACC_HD\ngo\n")]
    #[case("create table PUBACC_HD ( )\ngo\n")]
    fn rejects_missing_column_lists(#[case] document: &str) {
        let err = SchemaRegistry::load(document).expect_err("missing columns must fail");
        assert!(matches!(err, SchemaError::MissingColumnList { .. }), "{err:?}");
    }

    #[rstest]
    #[case("create table PUBACC_HD (a int\ngo\n")]
    fn rejects_unbalanced_statements(#[case] document: &str) {
        let err = SchemaRegistry::load(document).expect_err("syntax must fail");
        assert!(matches!(err, SchemaError::Syntax { statement: 1, .. }), "{err:?}");
    }

    #[rstest]
    fn rejects_unsupported_types() {
        let err = SchemaRegistry::load("create table PUBACC_HD (a geography)\ngo\n")
            .expect_err("unknown type must fail");
        assert!(matches!(err, SchemaError::UnsupportedColumnType { .. }));
    }

    #[rstest]
    fn rejects_documents_without_tables() {
        let err = SchemaRegistry::load("-- nothing here\ngo\n").expect_err("empty must fail");
        assert_eq!(err, SchemaError::NoRecordTypes);
    }

    #[rstest]
    #[case("HD.dat", Some("HD"))]
    #[case("archive/en.DAT", Some("EN"))]
    #[case("counts", None)]
    #[case("readme.txt", None)]
    #[case("bad name.dat", None)]
    fn derives_type_codes_from_file_names(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(TypeCode::from_file_name(name), expected.map(TypeCode::new));
    }
}
