use std::io::BufReader;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs_utf8::File;
use uls_core::{RawRow, TypeCode};
use zip::ZipArchive;

use super::ArchiveError;
use super::lines::RowLines;

pub(super) struct ZipSource {
    path: Utf8PathBuf,
    archive: ZipArchive<BufReader<File>>,
}

impl ZipSource {
    pub(super) fn open(path: &Utf8Path) -> Result<Self, ArchiveError> {
        let file = uls_fs::open_utf8_file(path).map_err(|source| ArchiveError::Open {
            path: path.to_owned(),
            source,
        })?;
        let archive = ZipArchive::new(BufReader::new(file)).map_err(|source| ArchiveError::Zip {
            path: path.to_owned(),
            source,
        })?;
        Ok(Self {
            path: path.to_owned(),
            archive,
        })
    }

    pub(super) fn record_file_names(&self) -> Vec<String> {
        self.archive
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(str::to_owned)
            .collect()
    }

    pub(super) fn rows<'a>(
        &'a mut self,
        type_code: &TypeCode,
        file_name: &str,
    ) -> Box<dyn Iterator<Item = RawRow> + 'a> {
        match self.archive.by_name(file_name) {
            Ok(entry) => Box::new(RowLines::new(
                BufReader::new(entry),
                type_code.clone(),
                file_name.to_owned(),
            )),
            Err(err) => {
                log::warn!("{}: cannot open entry {file_name}: {err}", self.path);
                Box::new(std::iter::once(RawRow::corrupt(
                    type_code.clone(),
                    file_name,
                    1,
                    err.to_string(),
                )))
            }
        }
    }
}
