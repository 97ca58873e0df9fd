//! Row normalization: raw extract cells → [`CanonicalRow`].
//!
//! Headers are whitespace-collapsed and de-duplicated the way spreadsheet
//! readers do it (a repeated header gains a `.1`, `.2`, … suffix) before being
//! matched against [`SOURCE_COLUMNS`] and [`GOAL_COLUMNS`]. Cells are coerced
//! according to each field's [`FieldKind`]; anything unusable becomes null.
//! Rows without an identity key are dropped.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Result, bail};
use itertools::Itertools;

use crate::{
    data::{FieldValue, clean_text, coerce_date, coerce_float, coerce_integer, strip_float_artifact},
    schema::{Field, FieldKind, GOAL_COLUMNS, GOAL_COUNT, SOURCE_COLUMNS},
};

const FLOAT_SCALE: usize = 1;
const GOAL_MARKER: &str = "X";

pub fn collapse_header(raw: &str) -> String {
    raw.split_whitespace().join(" ")
}

/// Collapses whitespace and suffixes repeated names with `.N` in order of
/// appearance, so `FASTING, FASTING` becomes `FASTING, FASTING.1`.
pub fn canonical_headers(raw: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.iter()
        .map(|header| {
            let collapsed = collapse_header(header);
            let count = seen.entry(collapsed.clone()).or_insert(0);
            let name = if *count == 0 {
                collapsed
            } else {
                format!("{collapsed}.{count}")
            };
            *count += 1;
            name
        })
        .collect()
}

/// Column positions of every mapped field and goal within one extract.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    fields: Vec<(Field, usize)>,
    goals: [Option<usize>; GOAL_COUNT],
}

impl HeaderMap {
    pub fn resolve(raw_headers: &[String]) -> Result<Self> {
        let headers = canonical_headers(raw_headers);
        let position = |name: &str| headers.iter().position(|h| h == name);

        let mut fields = Vec::with_capacity(SOURCE_COLUMNS.len());
        let mut missing = Vec::new();
        for column in SOURCE_COLUMNS {
            match position(column.header) {
                Some(idx) => fields.push((column.field, idx)),
                None => missing.push(column.header),
            }
        }
        if !missing.is_empty() {
            bail!(
                "Missing required column(s): {}",
                missing.iter().map(|h| format!("'{h}'")).join(", ")
            );
        }

        let mut goals = [None; GOAL_COUNT];
        for (slot, goal) in goals.iter_mut().zip(GOAL_COLUMNS.iter()) {
            *slot = position(goal.header);
        }
        Ok(Self { fields, goals })
    }

    /// Goal headers absent from the extract; their flags default to 0.
    pub fn missing_goals(&self) -> Vec<&'static str> {
        self.goals
            .iter()
            .zip(GOAL_COLUMNS.iter())
            .filter(|(slot, _)| slot.is_none())
            .map(|(_, goal)| goal.header)
            .collect()
    }
}

/// Behaviour-goal flags in [`GOAL_COLUMNS`] order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GoalFlags(pub [bool; GOAL_COUNT]);

impl GoalFlags {
    pub fn as_ints(&self) -> [i64; GOAL_COUNT] {
        self.0.map(i64::from)
    }
}

/// One extract row with typed, nulled fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRow {
    client_id: String,
    values: BTreeMap<Field, FieldValue>,
    pub goals: GoalFlags,
}

impl CanonicalRow {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            values: BTreeMap::new(),
            goals: GoalFlags::default(),
        }
    }

    /// Builder used when assembling rows by hand.
    pub fn with(mut self, field: Field, value: FieldValue) -> Self {
        self.set(field, Some(value));
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.values.get(&field)
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn set(&mut self, field: Field, value: Option<FieldValue>) {
        match value {
            Some(value) => {
                self.values.insert(field, value);
            }
            None => {
                self.values.remove(&field);
            }
        }
    }
}

pub fn normalize_field(kind: FieldKind, raw: &str) -> Option<FieldValue> {
    match kind {
        FieldKind::Text => clean_text(raw).map(|s| FieldValue::Text(s.to_string())),
        FieldKind::Gender => clean_text(raw).map(|s| {
            let expanded = match s {
                "M" | "m" => "Male",
                "F" | "f" => "Female",
                other => other,
            };
            FieldValue::Text(expanded.to_string())
        }),
        FieldKind::NumericText => clean_text(raw)
            .map(strip_float_artifact)
            .map(|s| FieldValue::Text(s.to_string())),
        FieldKind::Integer => coerce_integer(raw).map(FieldValue::Integer),
        FieldKind::Float => coerce_float(raw, FLOAT_SCALE).map(FieldValue::Float),
        FieldKind::Date => coerce_date(raw).map(FieldValue::Text),
    }
}

/// Returns `None` when the row has no usable identity key.
pub fn normalize_row(map: &HeaderMap, raw: &[String]) -> Option<CanonicalRow> {
    let cell = |idx: usize| raw.get(idx).map(String::as_str).unwrap_or("");

    let mut values = BTreeMap::new();
    for &(field, idx) in &map.fields {
        if let Some(value) = normalize_field(field.kind(), cell(idx)) {
            values.insert(field, value);
        }
    }
    let client_id = match values.remove(&Field::ClientId) {
        Some(FieldValue::Text(id)) => id,
        _ => return None,
    };

    let mut goals = GoalFlags::default();
    for (flag, slot) in goals.0.iter_mut().zip(map.goals.iter()) {
        *flag = slot.is_some_and(|idx| cell(idx).trim().eq_ignore_ascii_case(GOAL_MARKER));
    }

    Some(CanonicalRow {
        client_id,
        values,
        goals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_goals(goals: &[&str]) -> Vec<String> {
        let mut headers = Vec::new();
        for column in SOURCE_COLUMNS {
            let header = match column.header {
                "FASTING.1" => "FASTING",
                "A1C.1" => "A1C",
                other => other,
            };
            headers.push(header.to_string());
        }
        headers.extend(goals.iter().map(|g| g.to_string()));
        headers
    }

    fn blank_row(headers: &[String]) -> Vec<String> {
        vec![String::new(); headers.len()]
    }

    fn put(headers: &[String], row: &mut [String], header: &str, value: &str) {
        let idx = canonical_headers(headers)
            .iter()
            .position(|h| h == header)
            .unwrap_or_else(|| panic!("no header {header}"));
        row[idx] = value.to_string();
    }

    #[test]
    fn canonical_headers_collapse_whitespace_and_suffix_duplicates() {
        let raw = vec![
            "  CLIENT   ID ".to_string(),
            "FASTING".to_string(),
            "A1C".to_string(),
            "FASTING".to_string(),
            "A1C".to_string(),
            "MALE/\nFEMALE".to_string(),
        ];
        assert_eq!(
            canonical_headers(&raw),
            vec![
                "CLIENT ID",
                "FASTING",
                "A1C",
                "FASTING.1",
                "A1C.1",
                "MALE/ FEMALE"
            ]
        );
    }

    #[test]
    fn resolve_reports_every_missing_required_column() {
        let headers = vec!["CLIENT ID".to_string(), "FIRST NAME".to_string()];
        let err = HeaderMap::resolve(&headers).unwrap_err().to_string();
        assert!(err.contains("'LAST NAME'"));
        assert!(err.contains("'A1C.1'"));
        assert!(!err.contains("'CLIENT ID'"));
    }

    #[test]
    fn resolve_tolerates_missing_goal_columns() {
        let headers = headers_with_goals(&["QUIT SMOKING"]);
        let map = HeaderMap::resolve(&headers).unwrap();
        let missing = map.missing_goals();
        assert_eq!(missing.len(), GOAL_COUNT - 1);
        assert!(!missing.contains(&"QUIT SMOKING"));
    }

    #[test]
    fn normalize_row_coerces_each_kind() {
        let headers = headers_with_goals(&["QUIT SMOKING", "EAT BREAKFAST DAILY"]);
        let map = HeaderMap::resolve(&headers).unwrap();
        let mut row = blank_row(&headers);
        put(&headers, &mut row, "CLIENT ID", " JD0124032090 ");
        put(&headers, &mut row, "MALE/ FEMALE", " F ");
        put(&headers, &mut row, "AGE", "33.0");
        put(&headers, &mut row, "PHONE", "5551234567.0");
        put(&headers, &mut row, "ZIPCODE", "30301.0");
        put(&headers, &mut row, "First Screen Date", "01/15/2024");
        put(&headers, &mut row, "DATE", "2024-02-01 00:00:00");
        put(&headers, &mut row, "SYSTOLIC", "130");
        put(&headers, &mut row, "WEIGHT", "150.26");
        put(&headers, &mut row, "FASTING", "nan");
        put(&headers, &mut row, "FASTING.1", "Y");
        put(&headers, &mut row, "A1C.1", "5.75");
        put(&headers, &mut row, "Follow-Up", "NaN");
        put(&headers, &mut row, "QUIT SMOKING", " x ");
        put(&headers, &mut row, "EAT BREAKFAST DAILY", "no");

        let canonical = normalize_row(&map, &row).expect("row kept");
        assert_eq!(canonical.client_id(), "JD0124032090");
        assert_eq!(canonical.text(Field::Gender), Some("Female"));
        assert_eq!(canonical.get(Field::Age), Some(&FieldValue::Integer(33)));
        assert_eq!(canonical.text(Field::Phone), Some("5551234567"));
        assert_eq!(canonical.text(Field::Zipcode), Some("30301"));
        assert_eq!(canonical.text(Field::FirstScreenDate), Some("2024-01-15"));
        assert_eq!(canonical.text(Field::VisitDate), Some("2024-02-01"));
        assert_eq!(canonical.get(Field::Systolic), Some(&FieldValue::Integer(130)));
        assert_eq!(canonical.get(Field::Weight), Some(&FieldValue::Float(150.3)));
        assert_eq!(canonical.get(Field::Fasting), None);
        assert_eq!(canonical.text(Field::NewFasting), Some("Y"));
        assert_eq!(canonical.get(Field::NewA1c), Some(&FieldValue::Float(5.8)));
        assert_eq!(canonical.get(Field::FollowUp), None);

        let quit = GOAL_COLUMNS
            .iter()
            .position(|g| g.header == "QUIT SMOKING")
            .unwrap();
        let breakfast = GOAL_COLUMNS
            .iter()
            .position(|g| g.header == "EAT BREAKFAST DAILY")
            .unwrap();
        assert!(canonical.goals.0[quit]);
        assert!(!canonical.goals.0[breakfast]);
        assert_eq!(canonical.goals.as_ints().iter().sum::<i64>(), 1);
    }

    #[test]
    fn rows_without_identity_are_dropped() {
        let headers = headers_with_goals(&[]);
        let map = HeaderMap::resolve(&headers).unwrap();
        let mut row = blank_row(&headers);
        put(&headers, &mut row, "FIRST NAME", "Jane");
        assert!(normalize_row(&map, &row).is_none());

        put(&headers, &mut row, "CLIENT ID", "nan");
        assert!(normalize_row(&map, &row).is_none());
    }

    #[test]
    fn unparseable_cells_become_null() {
        assert_eq!(normalize_field(FieldKind::Integer, "high"), None);
        assert_eq!(normalize_field(FieldKind::Float, "n/a"), None);
        assert_eq!(normalize_field(FieldKind::Date, "13/45/2024"), None);
        assert_eq!(
            normalize_field(FieldKind::Gender, "Nonbinary"),
            Some(FieldValue::Text("Nonbinary".into()))
        );
    }
}
