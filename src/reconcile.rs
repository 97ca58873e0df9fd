//! Visit reconciliation: one canonical row in, up to one patient, two visit
//! and one goal record out.
//!
//! A row describes both the patient's first screening and the visit the row
//! was captured at. The baseline record lands on the first-screen date with
//! screening measurements only. The current record lands on the visit date
//! with event data and the updated measurements, and is suppressed on a first
//! visit that carries no measurements or event data. On a first visit both
//! records share a key, so the store merges them into one visit.

use crate::{
    data::FieldValue,
    normalize::{CanonicalRow, GoalFlags},
    schema::{Field, PATIENT_COLUMNS, VISIT_COLUMNS, VisitColumn, VisitSource},
};

#[derive(Debug, Clone, PartialEq)]
pub struct PatientRecord {
    pub client_id: String,
    /// Values in [`PATIENT_COLUMNS`] order.
    pub values: Vec<Option<FieldValue>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisitRecord {
    pub client_id: String,
    pub visit_date: String,
    /// Values in [`VISIT_COLUMNS`] order.
    pub values: Vec<Option<FieldValue>>,
}

impl VisitRecord {
    pub fn value(&self, column: &str) -> Option<&FieldValue> {
        VISIT_COLUMNS
            .iter()
            .position(|c| c.name == column)
            .and_then(|idx| self.values[idx].as_ref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoalRecord {
    pub client_id: String,
    pub visit_date: String,
    pub flags: GoalFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub patient: PatientRecord,
    pub baseline: Option<VisitRecord>,
    pub current: Option<VisitRecord>,
    pub goals: Option<GoalRecord>,
}

pub fn reconcile(row: &CanonicalRow) -> Reconciled {
    let client_id = row.client_id().to_string();
    let first_screen = row.text(Field::FirstScreenDate).map(str::to_string);
    // The sheet leaves DATE blank on a first visit.
    let visit_date = row
        .text(Field::VisitDate)
        .map(str::to_string)
        .or_else(|| first_screen.clone());

    let patient = PatientRecord {
        client_id: client_id.clone(),
        values: PATIENT_COLUMNS
            .iter()
            .map(|c| row.get(c.source).cloned())
            .collect(),
    };

    let baseline = first_screen.as_ref().map(|date| VisitRecord {
        client_id: client_id.clone(),
        visit_date: date.clone(),
        values: VISIT_COLUMNS.iter().map(|c| baseline_value(row, c)).collect(),
    });

    let current = visit_date
        .as_ref()
        .and_then(|date| current_visit(row, &client_id, date, first_screen.as_deref()));

    let goals = visit_date.map(|date| GoalRecord {
        client_id: client_id.clone(),
        visit_date: date,
        flags: row.goals,
    });

    Reconciled {
        patient,
        baseline,
        current,
        goals,
    }
}

fn baseline_value(row: &CanonicalRow, column: &VisitColumn) -> Option<FieldValue> {
    match column.source {
        VisitSource::Event(_) | VisitSource::Annotation(_) => None,
        VisitSource::Metric { baseline, .. } => row.get(baseline).cloned(),
        VisitSource::Carried(field) => row.get(field).cloned(),
    }
}

fn current_visit(
    row: &CanonicalRow,
    client_id: &str,
    visit_date: &str,
    first_screen: Option<&str>,
) -> Option<VisitRecord> {
    let first_visit = first_screen == Some(visit_date);
    let mut has_new_metrics = false;
    let mut has_event_data = false;

    let values = VISIT_COLUMNS
        .iter()
        .map(|column| match column.source {
            VisitSource::Event(field) => {
                let value = row.get(field).cloned();
                has_event_data |= value.is_some();
                value
            }
            VisitSource::Annotation(field) | VisitSource::Carried(field) => row.get(field).cloned(),
            VisitSource::Metric { baseline, updated } => {
                // On a first visit the screening value stands in for a
                // missing update, and counts as a metric for this record.
                let value = row
                    .get(updated)
                    .or_else(|| if first_visit { row.get(baseline) } else { None })
                    .cloned();
                has_new_metrics |= value.is_some();
                value
            }
        })
        .collect();

    let distinct_date = first_screen != Some(visit_date);
    (distinct_date || has_new_metrics || has_event_data).then(|| VisitRecord {
        client_id: client_id.to_string(),
        visit_date: visit_date.to_string(),
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> FieldValue {
        FieldValue::Text(value.to_string())
    }

    fn screened(date: &str) -> CanonicalRow {
        CanonicalRow::new("JD0124032090")
            .with(Field::FirstScreenDate, text(date))
            .with(Field::Systolic, FieldValue::Integer(130))
            .with(Field::Height, FieldValue::Float(64.0))
    }

    #[test]
    fn first_visit_with_screening_metrics_repeats_them_on_the_visit_date() {
        let row = screened("2024-01-15").with(Field::VisitDate, text("2024-01-15"));
        let out = reconcile(&row);
        let baseline = out.baseline.expect("baseline");
        assert_eq!(baseline.visit_date, "2024-01-15");
        assert_eq!(baseline.value("systolic"), Some(&FieldValue::Integer(130)));
        let current = out.current.expect("current");
        assert_eq!(current.visit_date, baseline.visit_date);
        assert_eq!(current.value("systolic"), Some(&FieldValue::Integer(130)));
        assert_eq!(out.goals.unwrap().visit_date, "2024-01-15");
    }

    #[test]
    fn first_visit_without_any_metrics_emits_only_baseline() {
        let row = CanonicalRow::new("JD0124032090")
            .with(Field::FirstScreenDate, text("2024-01-15"))
            .with(Field::VisitDate, text("2024-01-15"))
            .with(Field::Height, FieldValue::Float(64.0));
        let out = reconcile(&row);
        assert!(out.baseline.is_some());
        assert!(out.current.is_none());
    }

    #[test]
    fn blank_visit_date_defaults_to_first_screen() {
        let out = reconcile(&screened("2024-01-15"));
        assert_eq!(out.current.unwrap().visit_date, "2024-01-15");
        assert_eq!(out.goals.unwrap().visit_date, "2024-01-15");
    }

    #[test]
    fn follow_up_visit_emits_both_records() {
        let row = screened("2024-01-15")
            .with(Field::VisitDate, text("2024-03-01"))
            .with(Field::NewSystolic, FieldValue::Integer(118))
            .with(Field::EventType, text("Screening"))
            .with(Field::AcquiredBy, text("Clinic"));
        let out = reconcile(&row);

        let baseline = out.baseline.unwrap();
        assert_eq!(baseline.value("event_type"), None);
        assert_eq!(baseline.value("acquired_by"), None);
        assert_eq!(baseline.value("systolic"), Some(&FieldValue::Integer(130)));

        let current = out.current.unwrap();
        assert_eq!(current.client_id, "JD0124032090");
        assert_eq!(current.visit_date, "2024-03-01");
        assert_eq!(current.value("systolic"), Some(&FieldValue::Integer(118)));
        assert_eq!(current.value("event_type"), Some(&text("Screening")));
        assert_eq!(current.value("acquired_by"), Some(&text("Clinic")));
        assert_eq!(current.value("height"), Some(&FieldValue::Float(64.0)));
    }

    #[test]
    fn distinct_date_emits_current_even_without_data() {
        let row = screened("2024-01-15").with(Field::VisitDate, text("2024-02-01"));
        let current = reconcile(&row).current.expect("current");
        assert_eq!(current.value("systolic"), None);
    }

    #[test]
    fn first_visit_substitutes_baseline_when_event_data_present() {
        let row = screened("2024-01-15")
            .with(Field::VisitDate, text("2024-01-15"))
            .with(Field::Weight, FieldValue::Float(150.0))
            .with(Field::Hra, text("Yes"));
        let current = reconcile(&row).current.expect("current");
        assert_eq!(current.value("systolic"), Some(&FieldValue::Integer(130)));
        assert_eq!(current.value("weight"), Some(&FieldValue::Float(150.0)));
        assert_eq!(current.value("hra"), Some(&text("Yes")));
    }

    #[test]
    fn acquired_by_reaches_first_visit_current_record() {
        let row = screened("2024-01-15")
            .with(Field::VisitDate, text("2024-01-15"))
            .with(Field::AcquiredBy, text("Nurse Kim"));
        let out = reconcile(&row);
        assert_eq!(out.baseline.unwrap().value("acquired_by"), None);
        let current = out.current.expect("current");
        assert_eq!(current.value("acquired_by"), Some(&text("Nurse Kim")));
    }

    #[test]
    fn acquired_by_alone_does_not_justify_current_record() {
        let row = CanonicalRow::new("JD0124032090")
            .with(Field::FirstScreenDate, text("2024-01-15"))
            .with(Field::VisitDate, text("2024-01-15"))
            .with(Field::AcquiredBy, text("Clinic"));
        assert!(reconcile(&row).current.is_none());
    }

    #[test]
    fn rows_without_dates_produce_only_a_patient() {
        let row = CanonicalRow::new("JD0124032090").with(Field::FirstName, text("Jane"));
        let out = reconcile(&row);
        assert_eq!(out.patient.values[0], Some(text("Jane")));
        assert!(out.baseline.is_none());
        assert!(out.current.is_none());
        assert!(out.goals.is_none());
    }

    #[test]
    fn visit_without_first_screen_still_emits_current() {
        let row = CanonicalRow::new("JD0124032090")
            .with(Field::VisitDate, text("2024-05-05"))
            .with(Field::Systolic, FieldValue::Integer(140));
        let out = reconcile(&row);
        assert!(out.baseline.is_none());
        let current = out.current.expect("current");
        // Baseline metrics are not substituted off a first visit.
        assert_eq!(current.value("systolic"), None);
    }
}
