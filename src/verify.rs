use std::path::Path;

use anyhow::{Context, Result, bail};
use encoding_rs::Encoding;
use log::{error, info, warn};

use crate::{
    cli::VerifyArgs,
    io_utils::{self, ExtractRow},
    normalize::{HeaderMap, normalize_row},
    schema::CLIENT_LIST_SHEET,
};

/// What a verified extract would contribute to an import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub rows: usize,
    pub rows_without_id: usize,
    pub rows_unreadable: usize,
    pub missing_goals: Vec<&'static str>,
}

pub fn execute(args: &VerifyArgs) -> Result<()> {
    let input_encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let mut failures = 0usize;
    for input in &args.inputs {
        match verify_file(input, args.delimiter, input_encoding) {
            Ok(report) => {
                for goal in &report.missing_goals {
                    warn!(
                        "goal_column_missing file={} column=\"{goal}\"",
                        input.display()
                    );
                }
                if report.rows_unreadable > 0 {
                    warn!(
                        "rows_unreadable file={} count={}",
                        input.display(),
                        report.rows_unreadable
                    );
                }
                info!(
                    "✓ {:?} matches the {CLIENT_LIST_SHEET} layout (rows={} without_id={} unreadable={})",
                    input, report.rows, report.rows_without_id, report.rows_unreadable
                );
            }
            Err(err) => {
                error!("✗ {:?}: {err:#}", input);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{failures} file(s) failed verification");
    }
    Ok(())
}

/// Checks the header row against the column mapping and reads every record
/// the way an import would, without touching a store.
pub fn verify_file(
    path: &Path,
    delimiter: Option<u8>,
    encoding: &'static Encoding,
) -> Result<VerifyReport> {
    let extract = io_utils::open_extract(path, delimiter, encoding)?;
    let map = HeaderMap::resolve(extract.headers())
        .with_context(|| format!("Validating headers for {path:?}"))?;

    let mut report = VerifyReport {
        rows: 0,
        rows_without_id: 0,
        rows_unreadable: 0,
        missing_goals: map.missing_goals(),
    };
    for (row_idx, record) in extract.enumerate() {
        let record =
            record.with_context(|| format!("Reading row {} in {:?}", row_idx + 2, path))?;
        report.rows += 1;
        match record {
            ExtractRow::Cells(cells) => {
                if normalize_row(&map, &cells).is_none() {
                    report.rows_without_id += 1;
                }
            }
            ExtractRow::Unreadable(_) => report.rows_unreadable += 1,
        }
    }
    Ok(report)
}
