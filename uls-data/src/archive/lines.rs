//! Split a record file into raw rows.

use std::io::BufRead;

use uls_core::{RawRow, TypeCode};

/// Lazily decodes pipe-delimited lines.
///
/// Invalid UTF-8 is replaced rather than rejected, CRLF endings are accepted
/// and blank lines are skipped. A read error ends the stream with one
/// defective row.
pub(super) struct RowLines<R> {
    reader: R,
    type_code: TypeCode,
    source: String,
    line: u64,
    buffer: Vec<u8>,
    finished: bool,
}

impl<R: BufRead> RowLines<R> {
    pub(super) fn new(reader: R, type_code: TypeCode, source: String) -> Self {
        Self {
            reader,
            type_code,
            source,
            line: 0,
            buffer: Vec::new(),
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for RowLines<R> {
    type Item = RawRow;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            self.buffer.clear();
            match self.reader.read_until(b'\n', &mut self.buffer) {
                Ok(0) => self.finished = true,
                Ok(_) => {
                    self.line += 1;
                    let decoded = String::from_utf8_lossy(&self.buffer);
                    let text = decoded.trim_end_matches(['\n', '\r']);
                    if text.trim().is_empty() {
                        continue;
                    }
                    return Some(RawRow::from_line(
                        self.type_code.clone(),
                        self.source.clone(),
                        self.line,
                        text,
                    ));
                }
                Err(err) => {
                    self.finished = true;
                    return Some(RawRow::corrupt(
                        self.type_code.clone(),
                        self.source.clone(),
                        self.line + 1,
                        err.to_string(),
                    ));
                }
            }
        }
        None
    }
}
