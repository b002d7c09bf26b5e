//! Delimited text reader.
//!
//! Tokenizes a delimited extract into [`RawRecord`]s and validates line
//! shape. Field contents are left to [`crate::record::classify`].

use std::io;

use csv::{ByteRecord, ReaderBuilder};
use snafu::prelude::*;
use tracing::debug;

use crate::error::{
    EmptySourceSnafu, FieldCountSnafu, HeaderMismatchSnafu, ReaderError, UndecodableSnafu,
    UnrecoverableSnafu,
};
use crate::record::RawRecord;

const BOM: char = '\u{feff}';

/// Streaming reader over a delimited source with a fixed header.
///
/// Yields one item per non-blank data line. Row-level structural errors are
/// yielded in place of the record and iteration continues; after an
/// [`ReaderError::Unrecoverable`] the iterator is exhausted.
///
/// Quoted fields may not span lines. The tokenizer would otherwise fold
/// every line after an unterminated quote into one field, so a field
/// holding a line break ends the read as unrecoverable.
pub struct DelimitedReader<R> {
    inner: csv::Reader<R>,
    expected: usize,
    line: u64,
    record: ByteRecord,
    done: bool,
}

impl<R: io::Read> DelimitedReader<R> {
    /// Open a reader and validate the header line against `header`.
    pub fn new(input: R, delimiter: u8, header: &[String]) -> Result<Self, ReaderError> {
        let mut inner = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(input);

        let mut first = ByteRecord::new();
        let has_header = inner.read_byte_record(&mut first).map_err(|e| {
            UnrecoverableSnafu {
                line: 0u64,
                message: e.to_string(),
            }
            .build()
        })?;
        ensure!(has_header, EmptySourceSnafu);

        let found: Vec<String> = first
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let name = String::from_utf8_lossy(field);
                if i == 0 {
                    name.trim_start_matches(BOM).to_string()
                } else {
                    name.into_owned()
                }
            })
            .collect();
        ensure!(
            found == header,
            HeaderMismatchSnafu {
                expected: header.to_vec(),
                found,
            }
        );
        debug!(columns = header.len(), "Header validated");

        Ok(Self {
            inner,
            expected: header.len(),
            line: 0,
            record: ByteRecord::new(),
            done: false,
        })
    }

    /// Bytes consumed from the input so far, header included.
    pub fn bytes_consumed(&self) -> u64 {
        self.inner.position().byte()
    }

    /// Data lines read so far, including ones that failed.
    pub fn rows_read(&self) -> u64 {
        self.line
    }

    fn decode(&self) -> Result<RawRecord, ReaderError> {
        let actual = self.record.len();
        ensure!(
            actual == self.expected,
            FieldCountSnafu {
                line: self.line,
                expected: self.expected,
                actual,
            }
        );
        let fields = self
            .record
            .iter()
            .map(|field| {
                std::str::from_utf8(field)
                    .map(str::to_string)
                    .map_err(|e| {
                        UndecodableSnafu {
                            line: self.line,
                            message: e.to_string(),
                        }
                        .build()
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RawRecord::new(self.line, fields))
    }
}

impl<R: io::Read> Iterator for DelimitedReader<R> {
    type Item = Result<RawRecord, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.inner.read_byte_record(&mut self.record) {
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Ok(true) if is_blank(&self.record) => continue,
                Ok(true) => {
                    self.line += 1;
                    if spans_lines(&self.record) {
                        self.done = true;
                        return Some(Err(ReaderError::Unrecoverable {
                            line: self.line,
                            message: "unterminated quote: field runs across line breaks"
                                .to_string(),
                        }));
                    }
                    return Some(self.decode());
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(ReaderError::Unrecoverable {
                        line: self.line + 1,
                        message: e.to_string(),
                    }));
                }
            }
        }
    }
}

fn is_blank(record: &ByteRecord) -> bool {
    record.len() == 1 && record[0].iter().all(u8::is_ascii_whitespace)
}

fn spans_lines(record: &ByteRecord) -> bool {
    record
        .iter()
        .any(|field| field.iter().any(|&b| b == b'\n' || b == b'\r'))
}

/// Data-row count for a buffered source: non-blank lines, less the header.
///
/// Blank lines are skipped the same way the reader skips them, so for any
/// input without quoted line breaks this equals the final `rows_read`.
pub fn estimate_rows(bytes: &[u8]) -> u64 {
    let lines = bytes
        .split(|&b| b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .count() as u64;
    lines.saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<String> {
        ["id", "name", "amount"].iter().map(|s| s.to_string()).collect()
    }

    fn read(input: &str) -> Result<Vec<Result<RawRecord, ReaderError>>, ReaderError> {
        DelimitedReader::new(input.as_bytes(), b';', &header()).map(|r| r.collect())
    }

    #[test]
    fn test_reads_records_with_line_numbers() {
        let rows = read("id;name;amount\n1;a;10\n2;b;20\n").unwrap();
        assert_eq!(rows.len(), 2);
        let second = rows[1].as_ref().unwrap();
        assert_eq!(second.line, 2);
        assert_eq!(second.fields, vec!["2", "b", "20"]);
    }

    #[test]
    fn test_header_mismatch_is_fatal() {
        let err = read("id;Name;amount\n1;a;10\n").unwrap_err();
        assert!(matches!(err, ReaderError::HeaderMismatch { .. }));
        assert!(err.is_fatal());

        let err = read("id;name\n1;a\n").unwrap_err();
        assert!(matches!(err, ReaderError::HeaderMismatch { .. }));
    }

    #[test]
    fn test_empty_source() {
        assert!(matches!(read("").unwrap_err(), ReaderError::EmptySource));
    }

    #[test]
    fn test_bom_is_stripped_from_header() {
        let rows = read("\u{feff}id;name;amount\r\n1;a;10\r\n").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].as_ref().unwrap().fields[2], "10");
    }

    #[test]
    fn test_field_count_mismatch_is_row_level() {
        let rows = read("id;name;amount\n1;a\n2;b;20;extra\n3;c;30\n").unwrap();
        assert_eq!(rows.len(), 3);
        assert!(matches!(
            rows[0],
            Err(ReaderError::FieldCount {
                line: 1,
                expected: 3,
                actual: 2
            })
        ));
        assert!(matches!(
            rows[1],
            Err(ReaderError::FieldCount { actual: 4, .. })
        ));
        assert_eq!(rows[2].as_ref().unwrap().line, 3);
    }

    #[test]
    fn test_blank_lines_are_not_rows() {
        let rows = read("id;name;amount\n\n1;a;10\n   \n2;b;20\n\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].as_ref().unwrap().line, 2);
    }

    #[test]
    fn test_undecodable_line_is_row_level() {
        let mut input = b"id;name;amount\n1;".to_vec();
        input.extend_from_slice(&[0xff, 0xfe]);
        input.extend_from_slice(b";10\n2;b;20\n");

        let reader = DelimitedReader::new(input.as_slice(), b';', &header()).unwrap();
        let rows: Vec<_> = reader.collect();
        assert!(matches!(rows[0], Err(ReaderError::Undecodable { line: 1, .. })));
        assert!(rows[1].is_ok());
    }

    #[test]
    fn test_io_failure_is_unrecoverable() {
        struct Failing(usize);
        impl io::Read for Failing {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0 == 0 {
                    self.0 += 1;
                    let data = b"id;name;amount\n1;a;10\n";
                    buf[..data.len()].copy_from_slice(data);
                    return Ok(data.len());
                }
                Err(io::Error::other("disk gone"))
            }
        }

        let reader = DelimitedReader::new(Failing(0), b';', &header()).unwrap();
        let rows: Vec<_> = reader.collect();
        assert!(rows[0].is_ok());
        let last = rows.last().unwrap().as_ref().unwrap_err();
        assert!(matches!(last, ReaderError::Unrecoverable { .. }));
        assert!(last.is_fatal());
    }

    #[test]
    fn test_progress_counters() {
        let input = "id;name;amount\n1;a;10\n";
        let mut reader = DelimitedReader::new(input.as_bytes(), b';', &header()).unwrap();
        while reader.next().is_some() {}
        assert_eq!(reader.rows_read(), 1);
        assert_eq!(reader.bytes_consumed(), input.len() as u64);
    }

    #[test]
    fn test_estimate_rows() {
        assert_eq!(estimate_rows(b""), 0);
        assert_eq!(estimate_rows(b"h\n"), 0);
        assert_eq!(estimate_rows(b"h\n1\n2\n"), 2);
        assert_eq!(estimate_rows(b"h\n1\n2"), 2);
        assert_eq!(estimate_rows(b"h\r\n1\r\n2\r\n"), 2);
    }

    #[test]
    fn test_estimate_matches_rows_read_with_blank_lines() {
        let input = "id;name;amount\n1;a;10\n\n   \n\r\n\n";
        let mut reader = DelimitedReader::new(input.as_bytes(), b';', &header()).unwrap();
        while reader.next().is_some() {}
        assert_eq!(reader.rows_read(), 1);
        assert_eq!(estimate_rows(input.as_bytes()), 1);
    }

    #[test]
    fn test_unterminated_quote_is_unrecoverable() {
        let rows = read("id;name;amount\n1;a;10\n2;\"open;20\n3;c;30\n4;d;40\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_ok());
        let err = rows[1].as_ref().unwrap_err();
        assert!(matches!(err, ReaderError::Unrecoverable { line: 2, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_closed_quote_on_one_line_is_a_field() {
        let rows = read("id;name;amount\n1;\"a;b\";10\n").unwrap();
        assert_eq!(rows[0].as_ref().unwrap().fields, vec!["1", "a;b", "10"]);
    }
}
