//! Core domain types for the ULS import engine.
//!
//! This crate describes record types, rows and import runs without touching
//! files or databases. The schema registry parses the upstream data
//! definition document, the normalizer coerces raw rows against it, and the
//! run model carries the accounting the import engine persists.

pub mod normalize;
pub mod policy;
pub mod record;
pub mod run;
pub mod schema;

pub use normalize::normalize;
pub use policy::{InvalidFieldPolicy, ReplacePolicy};
pub use record::{
    FieldIssue, FieldIssueKind, RawRow, RowDefect, RowWarning, TypedRecord, Value,
};
pub use run::{
    ImportMode, ImportRun, ParseLabelError, RecordTypeCounts, RecordTypeOutcome,
    RecordTypeReport, RowDisposition, RunId, RunStatus,
};
pub use schema::{ColumnSpec, ColumnType, RecordTypeSchema, SchemaError, SchemaRegistry, TypeCode};
