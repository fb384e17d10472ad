use std::io::{self, BufReader};

use camino::{Utf8Path, Utf8PathBuf};
use uls_core::{RawRow, TypeCode};

use super::RECORD_FILE_EXTENSION;
use super::lines::RowLines;

/// Record files unpacked into a directory.
pub(super) struct DirectorySource {
    root: Utf8PathBuf,
}

impl DirectorySource {
    pub(super) fn new(root: &Utf8Path) -> Self {
        Self {
            root: root.to_owned(),
        }
    }

    pub(super) fn record_file_names(&self) -> io::Result<Vec<String>> {
        let files = uls_fs::list_files_with_extension(&self.root, RECORD_FILE_EXTENSION)?;
        Ok(files
            .iter()
            .filter_map(|path| path.file_name().map(str::to_owned))
            .collect())
    }

    pub(super) fn rows(
        &mut self,
        type_code: &TypeCode,
        file_name: &str,
    ) -> Box<dyn Iterator<Item = RawRow> + '_> {
        let path = self.root.join(file_name);
        match uls_fs::open_utf8_file(&path) {
            Ok(file) => Box::new(RowLines::new(
                BufReader::new(file),
                type_code.clone(),
                file_name.to_owned(),
            )),
            Err(err) => {
                log::warn!("cannot open record file {path}: {err}");
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
