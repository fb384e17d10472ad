//! Facade over the store used by the command-line front end.
//!
//! Each operation returns the run summary or a typed failure; deciding exit
//! codes and console output is left to the caller.

use camino::{Utf8Path, Utf8PathBuf};
use log::{info, warn};
use thiserror::Error;
use uls_core::{ImportRun, RunStatus};

use crate::import::{ImportEngine, ImportError, ImportOptions};
use crate::lookup::{Lookup, LookupError};
use crate::status::{StatusError, StatusReport, StatusReporter};
use crate::store::{Store, StoreError, StoreOptions, runs};

/// Archive names picked up by [`Driver::import_directory`] by default.
pub const DEFAULT_ARCHIVE_PATTERN: &str = "*.zip";

/// Which archives a directory import applies.
///
/// # Examples
/// ```
/// use uls_data::driver::ArchiveSelection;
///
/// let selection = ArchiveSelection::default().with_pattern("l_am_*.zip").reapplying(true);
/// assert_eq!(selection.pattern(), "l_am_*.zip");
/// assert!(selection.reapply());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSelection {
    pattern: String,
    reapply: bool,
}

impl Default for ArchiveSelection {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_ARCHIVE_PATTERN.to_owned(),
            reapply: false,
        }
    }
}

impl ArchiveSelection {
    /// Wildcard (`*`, `?`) the archive file names must match.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Apply archives again even when an earlier run applied the same file
    /// name successfully.
    #[must_use]
    pub const fn reapplying(mut self, reapply: bool) -> Self {
        self.reapply = reapply;
        self
    }

    /// Configured pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether previously applied archives are applied again.
    #[must_use]
    pub const fn reapply(&self) -> bool {
        self.reapply
    }
}

/// Outcome of a directory import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryImport {
    /// One run per applied archive, in application order.
    pub runs: Vec<ImportRun>,
    /// Archives skipped because an earlier run already applied them.
    pub skipped: Vec<Utf8PathBuf>,
}

/// Errors surfaced by driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The schema document could not be read from disk.
    #[error("failed to read schema document {path}")]
    ReadSchema {
        /// Document path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The store rejected the operation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An import aborted before any record type was attempted.
    #[error(transparent)]
    Import(#[from] ImportError),
    /// Status could not be read.
    #[error(transparent)]
    Status(#[from] StatusError),
    /// A lookup could not be prepared.
    #[error(transparent)]
    Lookup(#[from] LookupError),
    /// The archive directory could not be listed.
    #[error("failed to list archives in {path}")]
    ListArchives {
        /// Directory path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The archive directory holds no archives matching the pattern.
    #[error("no archives matching '{pattern}' found in {path}")]
    NoArchives {
        /// Directory path.
        path: Utf8PathBuf,
        /// Pattern the names were matched against.
        pattern: String,
    },
}

/// Owns a store and exposes the schema, import, status and maintenance
/// operations.
///
/// # Examples
/// ```
/// use uls_data::driver::Driver;
/// use uls_data::store::Store;
///
/// let mut driver = Driver::from_store(Store::open_in_memory()?);
/// driver.init_schema_from_str("create table dbo.PUBACC_HD (system_id int not null)")?;
/// assert!(driver.get_status(None)?.runs.is_empty());
/// # Ok::<(), uls_data::driver::DriverError>(())
/// ```
#[derive(Debug)]
pub struct Driver {
    store: Store,
}

impl Driver {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Utf8Path, options: &StoreOptions) -> Result<Self, DriverError> {
        Ok(Self::from_store(Store::open(path, options)?))
    }

    /// Open an existing store for status and lookups only.
    ///
    /// Nothing is created or migrated; a missing store is an error.
    pub fn open_read_only(path: &Utf8Path) -> Result<Self, DriverError> {
        Ok(Self::from_store(Store::open_read_only(path)?))
    }

    /// Wrap an already open store.
    #[must_use]
    pub const fn from_store(store: Store) -> Self {
        Self { store }
    }

    /// Borrow the underlying store.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Read the schema document at `path` and install its record types.
    pub fn init_schema(&mut self, path: &Utf8Path) -> Result<usize, DriverError> {
        let document = uls_fs::read_utf8_file(path).map_err(|source| DriverError::ReadSchema {
            path: path.to_owned(),
            source,
        })?;
        self.init_schema_from_str(&document)
    }

    /// Install the record types declared in `document`, returning how many
    /// were defined.
    pub fn init_schema_from_str(&mut self, document: &str) -> Result<usize, DriverError> {
        Ok(self.store.init_schema(document)?.len())
    }

    /// Truncate-and-reload every record type present in the snapshot at
    /// `source`.
    pub fn run_full_import(&mut self, source: &Utf8Path) -> Result<ImportRun, DriverError> {
        self.run_import(source, &ImportOptions::full())
    }

    /// Apply the daily delta at `source`; `replace` decides whether incoming
    /// records overwrite stored ones sharing a key (or, for key-less types,
    /// an identifier).
    pub fn run_daily_import(
        &mut self,
        source: &Utf8Path,
        replace: bool,
    ) -> Result<ImportRun, DriverError> {
        self.run_import(source, &ImportOptions::daily(replace))
    }

    /// Apply `source` with explicit options.
    pub fn run_import(
        &mut self,
        source: &Utf8Path,
        options: &ImportOptions,
    ) -> Result<ImportRun, DriverError> {
        let registry = self.store.registry()?;
        let run = ImportEngine::new(self.store.connection_mut(), &registry).run(source, options)?;
        Ok(run)
    }

    /// Apply every `*.zip` archive in `dir` in file-name order, one run each,
    /// skipping archives already applied.
    pub fn import_directory(
        &mut self,
        dir: &Utf8Path,
        options: &ImportOptions,
    ) -> Result<DirectoryImport, DriverError> {
        self.import_directory_with(dir, options, &ArchiveSelection::default())
    }

    /// Apply the archives in `dir` chosen by `selection`, in file-name order.
    ///
    /// An archive whose file name was applied by an earlier `SUCCEEDED` run is
    /// skipped unless the selection asks to reapply. Stops at the first
    /// archive that cannot be opened; runs already completed stay committed
    /// and are recorded in the run log.
    pub fn import_directory_with(
        &mut self,
        dir: &Utf8Path,
        options: &ImportOptions,
        selection: &ArchiveSelection,
    ) -> Result<DirectoryImport, DriverError> {
        let archives = uls_fs::list_files_matching(dir, selection.pattern()).map_err(|source| {
            DriverError::ListArchives {
                path: dir.to_owned(),
                source,
            }
        })?;
        if archives.is_empty() {
            return Err(DriverError::NoArchives {
                path: dir.to_owned(),
                pattern: selection.pattern().to_owned(),
            });
        }
        info!("applying {} archives from {dir}", archives.len());
        let registry = self.store.registry()?;
        let applied = if selection.reapply() {
            Default::default()
        } else {
            runs::applied_sources(self.store.connection())?
        };

        let mut outcome = DirectoryImport {
            runs: Vec::with_capacity(archives.len()),
            skipped: Vec::new(),
        };
        for archive in archives {
            if archive.file_name().is_some_and(|name| applied.contains(name)) {
                warn!("skipping {archive}: already applied by a {} run", RunStatus::Succeeded);
                outcome.skipped.push(archive);
                continue;
            }
            let run = ImportEngine::new(self.store.connection_mut(), &registry).run(&archive, options)?;
            outcome.runs.push(run);
        }
        Ok(outcome)
    }

    /// Run history, most recent first, and current table sizes.
    pub fn get_status(&self, limit: Option<usize>) -> Result<StatusReport, DriverError> {
        Ok(StatusReporter::new(self.store.connection()).report(limit)?)
    }

    /// Read-only query surface over the loaded tables.
    pub fn lookup(&self) -> Result<Lookup<'_>, DriverError> {
        Ok(Lookup::new(self.store.connection())?)
    }

    /// Reclaim free pages in the database file.
    pub fn vacuum(&self) -> Result<(), DriverError> {
        Ok(self.store.vacuum()?)
    }

    /// Refresh query planner statistics.
    pub fn analyze(&self) -> Result<(), DriverError> {
        Ok(self.store.analyze()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{SAMPLE_SCHEMA, write_zip_archive};
    use rstest::{fixture, rstest};
    use std::fs;
    use tempfile::TempDir;
    use uls_core::{ImportMode, RunStatus};

    struct Workspace {
        dir: TempDir,
        driver: Driver,
    }

    impl Workspace {
        fn path(&self, name: &str) -> Utf8PathBuf {
            Utf8PathBuf::from_path_buf(self.dir.path().join(name)).expect("UTF-8 path")
        }
    }

    #[fixture]
    fn workspace() -> Workspace {
        let dir = TempDir::new().expect("create temp dir");
        let db = Utf8PathBuf::from_path_buf(dir.path().join("db").join("uls.sqlite"))
            .expect("UTF-8 path");
        let driver = Driver::open(&db, &StoreOptions::default()).expect("open driver");
        Workspace { dir, driver }
    }

    #[rstest]
    fn installs_schema_from_a_file(mut workspace: Workspace) {
        let schema = workspace.path("pa_ddef.sql");
        fs::write(&schema, SAMPLE_SCHEMA).expect("write schema");
        let installed = workspace.driver.init_schema(&schema).expect("init schema");
        assert_eq!(installed, 3);
    }

    #[rstest]
    fn missing_schema_file_is_reported(mut workspace: Workspace) {
        let schema = workspace.path("absent.sql");
        let err = workspace.driver.init_schema(&schema).expect_err("missing file");
        assert!(matches!(err, DriverError::ReadSchema { .. }));
    }

    #[rstest]
    fn imports_require_an_installed_schema(mut workspace: Workspace) {
        let archive = workspace.path("l_amat.zip");
        write_zip_archive(archive.as_std_path(), &[("HD.dat", "1|W1AW|A\n")]).expect("write archive");
        let err = workspace.driver.run_full_import(&archive).expect_err("no schema");
        assert!(matches!(
            err,
            DriverError::Store(StoreError::SchemaNotInitialised)
        ));
    }

    #[rstest]
    fn full_then_daily_import(mut workspace: Workspace) {
        workspace
            .driver
            .init_schema_from_str(SAMPLE_SCHEMA)
            .expect("init schema");
        let full = workspace.path("l_amat.zip");
        write_zip_archive(full.as_std_path(), &[("HD.dat", "1|W1AW|ACTIVE\n2|K2ABC|ACTIVE\n")])
            .expect("write archive");
        let daily = workspace.path("l_am_mon.zip");
        write_zip_archive(daily.as_std_path(), &[("HD.dat", "2|K2ABC|EXPIRED\n")])
            .expect("write archive");

        let first = workspace.driver.run_full_import(&full).expect("full import");
        assert_eq!(first.status, RunStatus::Succeeded);
        let second = workspace
            .driver
            .run_daily_import(&daily, true)
            .expect("daily import");
        assert_eq!(second.mode, ImportMode::Daily);

        let status = workspace.driver.get_status(Some(1)).expect("status");
        assert_eq!(status.runs.len(), 1);
        assert_eq!(status.runs.first().map(|run| run.id), Some(second.id));
        assert_eq!(status.tables.get("PUBACC_HD"), Some(&2));

        let rows = workspace
            .driver
            .lookup()
            .expect("lookup")
            .by_call_sign("K2ABC")
            .expect("query");
        let row = rows.first().expect("row");
        assert_eq!(row.get("status"), Some(&uls_core::Value::Text("EXPIRED".into())));

        workspace.driver.analyze().expect("analyze");
        workspace.driver.vacuum().expect("vacuum");
    }

    #[rstest]
    fn imports_a_directory_of_archives_in_name_order(mut workspace: Workspace) {
        workspace
            .driver
            .init_schema_from_str(SAMPLE_SCHEMA)
            .expect("init schema");
        let incoming = workspace.path("incoming");
        fs::create_dir(&incoming).expect("create dir");
        write_zip_archive(
            incoming.join("l_am_tue.zip").as_std_path(),
            &[("HD.dat", "1|W1AW|EXPIRED\n")],
        )
        .expect("write archive");
        write_zip_archive(
            incoming.join("l_am_mon.zip").as_std_path(),
            &[("HD.dat", "1|W1AW|ACTIVE\n")],
        )
        .expect("write archive");
        fs::write(incoming.join("README.txt"), "ignored").expect("write note");

        let applied = workspace
            .driver
            .import_directory(&incoming, &ImportOptions::daily(true))
            .expect("import directory");
        assert!(applied.skipped.is_empty());
        let order: Vec<_> = applied
            .runs
            .iter()
            .filter_map(|run| run.sources.first())
            .filter_map(|source| Utf8Path::new(source).file_name().map(str::to_owned))
            .collect();
        assert_eq!(order, ["l_am_mon.zip", "l_am_tue.zip"]);

        let rows = workspace
            .driver
            .lookup()
            .expect("lookup")
            .by_call_sign("W1AW")
            .expect("query");
        assert_eq!(
            rows.first().and_then(|row| row.get("status")),
            Some(&uls_core::Value::Text("EXPIRED".into()))
        );
    }

    #[rstest]
    fn empty_directory_is_an_error(mut workspace: Workspace) {
        workspace
            .driver
            .init_schema_from_str(SAMPLE_SCHEMA)
            .expect("init schema");
        let empty = workspace.path("empty");
        fs::create_dir(&empty).expect("create dir");
        let err = workspace
            .driver
            .import_directory(&empty, &ImportOptions::full())
            .expect_err("no archives");
        assert!(matches!(err, DriverError::NoArchives { .. }));
    }

    fn write_daily_archives(workspace: &Workspace) -> Utf8PathBuf {
        let incoming = workspace.path("incoming");
        fs::create_dir(&incoming).expect("create dir");
        for (name, status) in [("l_am_mon.zip", "ACTIVE"), ("l_am_tue.zip", "EXPIRED")] {
            write_zip_archive(
                incoming.join(name).as_std_path(),
                &[("HD.dat", format!("1|W1AW|{status}\n").as_str())],
            )
            .expect("write archive");
        }
        write_zip_archive(
            incoming.join("l_amat.zip").as_std_path(),
            &[("HD.dat", "1|W1AW|PENDING\n")],
        )
        .expect("write archive");
        incoming
    }

    #[rstest]
    fn directory_imports_skip_archives_already_applied(mut workspace: Workspace) {
        workspace
            .driver
            .init_schema_from_str(SAMPLE_SCHEMA)
            .expect("init schema");
        let incoming = write_daily_archives(&workspace);
        let selection = ArchiveSelection::default().with_pattern("l_am_*.zip");
        let options = ImportOptions::daily(true);

        let first = workspace
            .driver
            .import_directory_with(&incoming, &options, &selection)
            .expect("first pass");
        assert_eq!(first.runs.len(), 2, "l_amat.zip does not match the pattern");

        let second = workspace
            .driver
            .import_directory_with(&incoming, &options, &selection)
            .expect("second pass");
        assert!(second.runs.is_empty());
        let skipped: Vec<_> = second.skipped.iter().filter_map(|path| path.file_name()).collect();
        assert_eq!(skipped, ["l_am_mon.zip", "l_am_tue.zip"]);

        let again = workspace
            .driver
            .import_directory_with(&incoming, &options, &selection.reapplying(true))
            .expect("reapply");
        assert_eq!(again.runs.len(), 2);
        assert!(again.skipped.is_empty());
    }

    #[rstest]
    fn unmatched_patterns_are_reported(mut workspace: Workspace) {
        workspace
            .driver
            .init_schema_from_str(SAMPLE_SCHEMA)
            .expect("init schema");
        let incoming = write_daily_archives(&workspace);
        let selection = ArchiveSelection::default().with_pattern("l_uls_*.zip");
        let err = workspace
            .driver
            .import_directory_with(&incoming, &ImportOptions::full(), &selection)
            .expect_err("nothing matches");
        match err {
            DriverError::NoArchives { pattern, .. } => assert_eq!(pattern, "l_uls_*.zip"),
            other => panic!("expected NoArchives, got {other:?}"),
        }
    }

    #[rstest]
    fn read_only_drivers_never_create_a_store() {
        let dir = TempDir::new().expect("create temp dir");
        let missing = Utf8PathBuf::from_path_buf(dir.path().join("typo").join("uls.sqlite"))
            .expect("UTF-8 path");
        let err = Driver::open_read_only(&missing).expect_err("missing store");
        assert!(matches!(err, DriverError::Store(StoreError::Open { .. })), "{err:?}");
        assert!(!dir.path().join("typo").exists());
    }

    #[rstest]
    fn read_only_drivers_report_status(mut workspace: Workspace) {
        workspace
            .driver
            .init_schema_from_str(SAMPLE_SCHEMA)
            .expect("init schema");
        let archive = workspace.path("l_amat.zip");
        write_zip_archive(archive.as_std_path(), &[("HD.dat", "1|W1AW|ACTIVE\n")])
            .expect("write archive");
        workspace.driver.run_full_import(&archive).expect("full import");
        let db = workspace
            .driver
            .store()
            .path()
            .map(Utf8Path::to_owned)
            .expect("file-backed store");

        let reader = Driver::open_read_only(&db).expect("open read-only");
        let status = reader.get_status(None).expect("status");
        assert_eq!(status.runs.len(), 1);
        assert_eq!(status.tables.get("PUBACC_HD"), Some(&1));
        let rows = reader.lookup().expect("lookup").by_call_sign("w1aw").expect("query");
        assert_eq!(rows.len(), 1);
    }
}
