//! Facade crate for the ULS import engine.
//!
//! This crate re-exports the domain types and, behind the `store-sqlite`
//! feature, the archive reader, store, import engine, status reporter and
//! lookups.

#![forbid(unsafe_code)]

pub use uls_core::{
    ColumnSpec, ColumnType, FieldIssue, FieldIssueKind, ImportMode, ImportRun,
    InvalidFieldPolicy, RawRow, RecordTypeCounts, RecordTypeOutcome, RecordTypeReport,
    RecordTypeSchema, ReplacePolicy, RowDefect, RowWarning, RunId, RunStatus, SchemaError,
    SchemaRegistry, TypeCode, TypedRecord, Value, normalize,
};

#[cfg(feature = "store-sqlite")]
pub use uls_data::{
    ArchiveError, ArchiveReader, ArchiveSelection, DirectoryImport, Driver, DriverError,
    ImportEngine, ImportError, ImportOptions, Lookup, LookupError, LookupRow, StatusError,
    StatusReport, StatusReporter, Store, StoreError, StoreOptions,
};
