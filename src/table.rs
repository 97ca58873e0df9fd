use std::borrow::Cow;
use std::fmt::Write as _;

use crate::pipeline::{FileStatus, ImportSummary};

const SUMMARY_HEADERS: [&str; 10] = [
    "file",
    "status",
    "rows",
    "skipped",
    "patients",
    "inserted",
    "updated",
    "goals",
    "birthdates",
    "checkpoints",
];

/// Renders the per-file outcome of a run as an aligned plain-text table,
/// followed by a totals line.
pub fn render_summary(summary: &ImportSummary) -> String {
    let headers = SUMMARY_HEADERS.map(str::to_string);
    let rows = summary
        .files
        .iter()
        .map(|outcome| {
            let status = match &outcome.status {
                FileStatus::Committed => "committed".to_string(),
                FileStatus::Failed { .. } => "failed".to_string(),
            };
            vec![
                outcome.file.display().to_string(),
                status,
                outcome.rows_read.to_string(),
                outcome.rows_skipped.to_string(),
                outcome.counts.patients.to_string(),
                outcome.counts.visits_inserted.to_string(),
                outcome.counts.visits_updated.to_string(),
                outcome.counts.goals.to_string(),
                outcome.counts.birthdates.to_string(),
                outcome.checkpoints.to_string(),
            ]
        })
        .collect::<Vec<_>>();

    let mut output = render_table(&headers, &rows);
    let totals = summary.totals();
    let _ = writeln!(
        output,
        "{} file(s), {} failed; {} row(s), {} patient(s), {} visit(s) inserted, {} updated",
        summary.files.len(),
        summary.failed_count(),
        summary.rows_read(),
        totals.patients,
        totals.visits_inserted,
        totals.visits_updated
    );
    for outcome in summary.failed() {
        if let FileStatus::Failed { error } = &outcome.status {
            let _ = writeln!(output, "failed {}: {}", outcome.file.display(), sanitize_cell(error));
        }
    }
    output
}

/// First column is left aligned, the remaining columns are counts and are
/// right aligned.
fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separator = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut cells = Vec::with_capacity(values.len());
    for (idx, value) in values.iter().enumerate().take(widths.len()) {
        let sanitized = sanitize_cell(value);
        let padding = " ".repeat(widths[idx].saturating_sub(display_width(&sanitized)));
        if idx == 0 {
            cells.push(format!("{sanitized}{padding}"));
        } else {
            cells.push(format!("{padding}{sanitized}"));
        }
    }
    let mut line = cells.join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
