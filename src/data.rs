use anyhow::{Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

/// A single typed cell after normalization. Absence is modelled with `Option`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            FieldValue::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            FieldValue::Float(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
        })
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    // Two-digit years first: `%Y` would happily read `24` as year 0024.
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%Y/%m/%d", "%m-%d-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    parse_naive_datetime(value)
        .map(|dt| dt.date())
        .map_err(|_| anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Returns `None` for blank cells and the `nan` placeholder left behind by
/// numeric-to-text conversion of empty spreadsheet cells.
pub fn clean_text(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed)
    }
}

/// ISO `YYYY-MM-DD`, or `None` when the cell is blank or unparseable.
pub fn coerce_date(value: &str) -> Option<String> {
    let text = clean_text(value)?;
    parse_naive_date(text)
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}

/// Integer columns are often exported as floats (`120.0`); the fraction is
/// truncated. Anything non-numeric becomes `None`.
pub fn coerce_integer(value: &str) -> Option<i64> {
    let text = clean_text(value)?;
    if let Ok(parsed) = text.parse::<i64>() {
        return Some(parsed);
    }
    let parsed: f64 = text.parse().ok()?;
    if parsed.is_finite() {
        Some(parsed.trunc() as i64)
    } else {
        None
    }
}

pub fn coerce_float(value: &str, scale: usize) -> Option<f64> {
    let text = clean_text(value)?;
    let parsed: f64 = text.parse().ok()?;
    if parsed.is_finite() {
        Some(round_float(parsed, scale))
    } else {
        None
    }
}

pub fn round_float(value: f64, scale: usize) -> f64 {
    if scale == 0 {
        value.round()
    } else {
        let factor = 10f64.powi(scale as i32);
        (value * factor).round() / factor
    }
}

/// Phone numbers and zip codes read from numeric cells carry a `.0` tail.
pub fn strip_float_artifact(value: &str) -> &str {
    value.strip_suffix(".0").unwrap_or(value)
}
