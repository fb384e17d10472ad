//! Archive access, persistence and import logic for the ULS engine.
//!
//! Responsibilities:
//! - Stream raw rows out of zip archives and directories of record files.
//! - Own the SQLite store: bookkeeping migrations, record-type tables and the
//!   import run log.
//! - Apply full and daily imports with one transaction per record type.
//! - Answer status and lookup queries without writing.
//!
//! Boundaries:
//! - Do not encode normalisation rules (live in `uls-core`).
//! - Do not decide exit codes or console output (live in `uls-cli`).
//!
//! Invariants:
//! - A record type's rows and its run report commit or roll back together.
//! - No global mutable state.

pub mod archive;
pub mod driver;
pub mod import;
pub mod lookup;
pub mod status;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use archive::{ArchiveError, ArchiveReader, RecordEntry};
pub use driver::{ArchiveSelection, DirectoryImport, Driver, DriverError};
pub use import::{ImportEngine, ImportError, ImportOptions};
pub use lookup::{Lookup, LookupError, LookupRow};
pub use status::{StatusError, StatusReport, StatusReporter};
pub use store::{Store, StoreError, StoreOptions};
