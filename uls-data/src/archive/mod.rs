//! Stream raw rows out of bulk and daily export archives.
//!
//! An archive is either a zip file or a directory of unpacked record files.
//! Each record type ships as its own pipe-delimited `XX.dat` file; the type
//! code is taken from the file name. Entries are opened one at a time and
//! rows are decoded lazily, so large archives are never held in memory.
//!
//! A record file that fails to read yields a single row carrying a
//! [`RowDefect`](uls_core::RowDefect) instead of aborting, so sibling files
//! in the same archive still load.

mod directory;
mod lines;
mod zip_file;

use camino::{Utf8Path, Utf8PathBuf};
use std::io;
use thiserror::Error;
use uls_core::{RawRow, TypeCode};

use directory::DirectorySource;
use zip_file::ZipSource;

/// Extension carried by record files inside an archive.
pub const RECORD_FILE_EXTENSION: &str = "dat";

/// One record file within an archive.
pub struct RecordEntry<'a> {
    /// Record type derived from the file name.
    pub type_code: TypeCode,
    /// File name within the archive.
    pub file_name: String,
    /// Rows in file order. Single pass.
    pub rows: Box<dyn Iterator<Item = RawRow> + 'a>,
}

impl std::fmt::Debug for RecordEntry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordEntry")
            .field("type_code", &self.type_code)
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

/// Errors raised while opening an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Nothing exists at the supplied path.
    #[error("archive {path} does not exist")]
    NotFound {
        /// Path that was requested.
        path: Utf8PathBuf,
    },
    /// The path exists but could not be opened or inspected.
    #[error("failed to open archive {path}")]
    Open {
        /// Archive path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The zip central directory could not be read.
    #[error("failed to read zip archive {path}")]
    Zip {
        /// Archive path.
        path: Utf8PathBuf,
        /// Underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },
    /// The archive holds no `.dat` record files.
    #[error("archive {path} contains no record files")]
    NoRecordFiles {
        /// Archive path.
        path: Utf8PathBuf,
    },
}

enum Source {
    Zip(ZipSource),
    Directory(DirectorySource),
}

/// Open handle on an archive, yielding record files in name order.
///
/// The underlying file handle is released when the reader is dropped.
///
/// # Examples
/// ```no_run
/// use camino::Utf8Path;
/// use uls_data::archive::ArchiveReader;
///
/// # fn main() -> Result<(), uls_data::archive::ArchiveError> {
/// let mut reader = ArchiveReader::open(Utf8Path::new("l_amat.zip"))?;
/// while let Some(entry) = reader.next_entry() {
///     let rows = entry.rows.count();
///     println!("{}: {rows} rows", entry.type_code);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ArchiveReader {
    path: Utf8PathBuf,
    source: Source,
    pending: std::vec::IntoIter<(TypeCode, String)>,
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("path", &self.path)
            .field("remaining", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ArchiveReader {
    /// Open a zip archive or a directory of record files.
    pub fn open(path: &Utf8Path) -> Result<Self, ArchiveError> {
        let open_error = |source| ArchiveError::Open {
            path: path.to_owned(),
            source,
        };
        let (source, names) = if uls_fs::dir_is_dir(path).map_err(open_error)? {
            let source = DirectorySource::new(path);
            let names = source.record_file_names().map_err(open_error)?;
            (Source::Directory(source), names)
        } else if uls_fs::file_is_file(path).map_err(open_error)? {
            let source = ZipSource::open(path)?;
            let names = source.record_file_names();
            (Source::Zip(source), names)
        } else {
            return Err(ArchiveError::NotFound {
                path: path.to_owned(),
            });
        };

        let mut pending: Vec<(TypeCode, String)> = names
            .into_iter()
            .filter_map(|name| TypeCode::from_file_name(&name).map(|code| (code, name)))
            .collect();
        if pending.is_empty() {
            return Err(ArchiveError::NoRecordFiles {
                path: path.to_owned(),
            });
        }
        pending.sort_by(|left, right| left.1.cmp(&right.1));
        log::debug!("opened {path} with {} record files", pending.len());

        Ok(Self {
            path: path.to_owned(),
            source,
            pending: pending.into_iter(),
        })
    }

    /// Path the reader was opened from.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Advance to the next record file.
    ///
    /// The returned entry borrows the reader, so it must be consumed or
    /// dropped before the next call.
    pub fn next_entry(&mut self) -> Option<RecordEntry<'_>> {
        let (type_code, file_name) = self.pending.next()?;
        let rows = match &mut self.source {
            Source::Zip(source) => source.rows(&type_code, &file_name),
            Source::Directory(source) => source.rows(&type_code, &file_name),
        };
        Some(RecordEntry {
            type_code,
            file_name,
            rows,
        })
    }
}
