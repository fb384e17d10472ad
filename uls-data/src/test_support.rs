//! Fixture builders shared by unit, behaviour and CLI tests.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Small schema document covering a header, entity and amateur record type.
///
/// `HD` carries no `record_type` marker and keys on `system_id`; `EN`
/// declares a composite key; `AM` includes a date column.
pub const SAMPLE_SCHEMA: &str = "\
-- trimmed public access definitions used in tests
create table dbo.PUBACC_HD
(
      system_id                 int            not null,
      call_sign                 char(10)       null,
      status                    varchar(10)    null
)
go

create table dbo.PUBACC_EN
(
      record_type               char(2)        not null,
      unique_system_identifier  numeric(9,0)   not null,
      entity_type               char(2)        not null,
      entity_name               varchar(200)   null,
      frn                       char(10)       null,
      primary key (unique_system_identifier, entity_type)
)
go

create table dbo.PUBACC_AM
(
      record_type               char(2)        not null,
      unique_system_identifier  numeric(9,0)   not null,
      call_sign                 char(10)       null,
      operator_class            char(1)        null,
      grant_date                datetime       null
)
go
";

/// Write a zip archive holding one stored (uncompressed) entry per
/// `(file name, contents)` pair.
///
/// Stored entries keep the contents verbatim in the archive bytes so
/// [`corrupt_archive_entry`] can damage them.
pub fn write_zip_archive(path: &Path, entries: &[(&str, &str)]) -> io::Result<()> {
    let file = fs::File::create(path)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, contents) in entries {
        writer.start_file(*name, options).map_err(io::Error::other)?;
        writer.write_all(contents.as_bytes())?;
    }
    writer.finish().map_err(io::Error::other)?;
    Ok(())
}

/// Write unpacked record files into `dir`, creating it when missing.
pub fn write_record_directory(dir: &Path, entries: &[(&str, &str)]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    for (name, contents) in entries {
        fs::write(dir.join(name), contents)?;
    }
    Ok(())
}

/// Flip the case of the first byte of `marker` inside the archive so the
/// entry holding it fails its checksum when read.
pub fn corrupt_archive_entry(path: &Path, marker: &str) -> io::Result<()> {
    let mut bytes = fs::read(path)?;
    let position = bytes
        .windows(marker.len())
        .position(|window| window == marker.as_bytes())
        .ok_or_else(|| io::Error::other(format!("marker {marker} not found in archive")))?;
    if let Some(byte) = bytes.get_mut(position) {
        *byte ^= 0x20;
    }
    fs::write(path, bytes)
}
