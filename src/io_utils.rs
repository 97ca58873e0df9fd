//! Reader construction and decoding for spreadsheet extracts.
//!
//! Extracts arrive either as workbooks or as delimited text exports of the
//! client list sheet:
//!
//! - **Workbooks**: `.xlsx`, `.xlsm`, `.xlsb`, `.xls` and `.ods` files are read
//!   through [`crate::workbook`], one named sheet at a time.
//! - **Delimiter resolution**: `.tsv` → tab, anything else → comma, unless
//!   overridden on the command line.
//! - **Encoding**: cells are decoded with `encoding_rs`, defaulting to UTF-8;
//!   spreadsheet exports from Windows hosts are commonly `windows-1252`.
//! - **Row shape**: a record whose field count differs from the header, or
//!   whose cells cannot be decoded, is surfaced as [`ExtractRow::Unreadable`]
//!   so the caller can skip it. I/O errors still fail the read.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};

use crate::{schema::CLIENT_LIST_SHEET, workbook};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    delimiter: u8,
) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    Ok(open_csv_reader(BufReader::new(file), delimiter))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    decode_record(&headers, encoding)
}

/// One data row of an extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractRow {
    Cells(Vec<String>),
    /// The row cannot be used; carries the reason.
    Unreadable(String),
}

/// Header row plus a stream of data rows, whatever the file format.
pub struct Extract {
    headers: Vec<String>,
    rows: Box<dyn Iterator<Item = Result<ExtractRow>>>,
}

impl Extract {
    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl Iterator for Extract {
    type Item = Result<ExtractRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

/// Opens `path` as a workbook (by extension) or as delimited text.
pub fn open_extract(
    path: &Path,
    delimiter: Option<u8>,
    encoding: &'static Encoding,
) -> Result<Extract> {
    if workbook::is_workbook(path) {
        let (headers, rows) = workbook::read_sheet(path, CLIENT_LIST_SHEET)?;
        return Ok(Extract {
            headers,
            rows: Box::new(rows.into_iter().map(|cells| Ok(ExtractRow::Cells(cells)))),
        });
    }

    let delimiter = resolve_input_delimiter(path, delimiter);
    let mut reader = open_csv_reader_from_path(path, delimiter)?;
    let headers = reader_headers(&mut reader, encoding)
        .with_context(|| format!("Reading headers from {path:?}"))?;
    let width = headers.len();
    let rows = reader
        .into_byte_records()
        .map(move |record| -> Result<ExtractRow> {
            let record = record?;
            if record.len() != width {
                return Ok(ExtractRow::Unreadable(format!(
                    "expected {width} fields, found {}",
                    record.len()
                )));
            }
            Ok(match decode_record(&record, encoding) {
                Ok(cells) => ExtractRow::Cells(cells),
                Err(err) => ExtractRow::Unreadable(err.to_string()),
            })
        });
    Ok(Extract {
        headers,
        rows: Box::new(rows),
    })
}
