//! Static schema descriptor shared by the normalizer and the upsert engine.
//!
//! Two halves live here:
//!
//! - **Source mapping**: the fixed spreadsheet header → [`Field`] table
//!   ([`SOURCE_COLUMNS`]) plus the thirteen behaviour-goal columns
//!   ([`GOAL_COLUMNS`]). Each field carries a [`FieldKind`] that tells the
//!   normalizer how to coerce the raw cell.
//! - **Store tables**: ordered column descriptors for `patients`,
//!   `patient_visits` and `patients_goals`, and the statement builders derived
//!   from them. Every statement is parameterized; only column lists and
//!   placeholder counts come from the descriptors.

use itertools::Itertools;

pub const CLIENT_LIST_SHEET: &str = "CLIENT LIST";

pub const PATIENTS_TABLE: &str = "patients";
pub const VISITS_TABLE: &str = "patient_visits";
pub const GOALS_TABLE: &str = "patients_goals";

/// Canonical fields a spreadsheet row can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    ClientId,
    FirstName,
    LastName,
    Gender,
    Age,
    Race,
    PrimaryLang,
    Insurance,
    Phone,
    Zipcode,
    EventType,
    ReferralSource,
    FirstScreenDate,
    FollowUp,
    VisitDate,
    AcquiredBy,
    Hra,
    Edu,
    CaseManagement,
    Systolic,
    Diastolic,
    Cholesterol,
    Fasting,
    Glucose,
    Height,
    Weight,
    Bmi,
    A1c,
    NewSystolic,
    NewDiastolic,
    NewCholesterol,
    NewFasting,
    NewGlucose,
    NewWeight,
    NewBmi,
    NewA1c,
}

/// How a raw cell is coerced into a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// `M`/`F` abbreviations expand to full words.
    Gender,
    /// Digits stored as text; a trailing `.0` conversion artifact is removed.
    NumericText,
    Integer,
    /// Rounded to one decimal place.
    Float,
    Date,
}

impl Field {
    pub const fn kind(self) -> FieldKind {
        use Field::*;
        match self {
            Gender => FieldKind::Gender,
            Phone | Zipcode => FieldKind::NumericText,
            Age | Systolic | Diastolic | Cholesterol | Glucose | NewSystolic | NewDiastolic
            | NewCholesterol | NewGlucose => FieldKind::Integer,
            Height | Weight | Bmi | A1c | NewWeight | NewBmi | NewA1c => FieldKind::Float,
            FirstScreenDate | VisitDate => FieldKind::Date,
            ClientId | FirstName | LastName | Race | PrimaryLang | Insurance | EventType
            | ReferralSource | FollowUp | AcquiredBy | Hra | Edu | CaseManagement | Fasting
            | NewFasting => FieldKind::Text,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SourceColumn {
    pub header: &'static str,
    pub field: Field,
}

const fn source(header: &'static str, field: Field) -> SourceColumn {
    SourceColumn { header, field }
}

/// Every header here must be present in an extract. Headers are compared
/// after whitespace collapsing; the second `FASTING`/`A1C` columns arrive as
/// `FASTING.1`/`A1C.1`.
pub const SOURCE_COLUMNS: &[SourceColumn] = &[
    source("CLIENT ID", Field::ClientId),
    source("FIRST NAME", Field::FirstName),
    source("LAST NAME", Field::LastName),
    source("MALE/ FEMALE", Field::Gender),
    source("AGE", Field::Age),
    source("RACE", Field::Race),
    source("Primary Language", Field::PrimaryLang),
    source("Insurance", Field::Insurance),
    source("PHONE", Field::Phone),
    source("ZIPCODE", Field::Zipcode),
    source("EVENT TYPE", Field::EventType),
    source("How did you find program", Field::ReferralSource),
    source("First Screen Date", Field::FirstScreenDate),
    source("Follow-Up", Field::FollowUp),
    source("DATE", Field::VisitDate),
    source("AQUIRED BY", Field::AcquiredBy),
    source("HRA", Field::Hra),
    source("EDU", Field::Edu),
    source("Case Management", Field::CaseManagement),
    source("SYSTOLIC", Field::Systolic),
    source("DIASTOLIC", Field::Diastolic),
    source("Cholesterol", Field::Cholesterol),
    source("FASTING", Field::Fasting),
    source("GLUCOSE", Field::Glucose),
    source("HEIGHT (in)", Field::Height),
    source("WEIGHT", Field::Weight),
    source("BMI", Field::Bmi),
    source("A1C", Field::A1c),
    source("NEW SYSTOLIC", Field::NewSystolic),
    source("NEW DIASTOLIC", Field::NewDiastolic),
    source("NEW CHOLESTEROL", Field::NewCholesterol),
    source("FASTING.1", Field::NewFasting),
    source("NEW GLUCOSE", Field::NewGlucose),
    source("NEW WEIGHT", Field::NewWeight),
    source("NEW BMI", Field::NewBmi),
    source("A1C.1", Field::NewA1c),
];

#[derive(Debug, Clone, Copy)]
pub struct GoalColumn {
    pub header: &'static str,
    pub column: &'static str,
}

const fn goal(header: &'static str, column: &'static str) -> GoalColumn {
    GoalColumn { header, column }
}

pub const GOAL_COUNT: usize = 13;

pub const GOAL_COLUMNS: [GoalColumn; GOAL_COUNT] = [
    goal("INCREASED DAILY FRUIT/ VEGETABLE PORTIONS", "increased_fruit_veg"),
    goal("INCREASE DAILY WATER INTAKE", "increased_water"),
    goal("INCREASED WEEKLY EXERCISE", "increased_exercise"),
    goal("CUT TV VIEWING TO < 2 HOURS/ DAY", "cut_tv_viewing"),
    goal("EAT BREAKFAST DAILY", "eat_breakfast"),
    goal("LIMIT DAILY ALCOHOL CONSUMPTION WOMAN =1, MAN=2", "limit_alcohol"),
    goal("DO NOT EAT AT LEAST 3 HOURS BEFORE GOING TO BED", "no_late_eating"),
    goal("EATS MORE WHOLE WHEAT/ GRAINS DAILY", "more_whole_grains"),
    goal("EATS LESS FRIED FOODS OR MEATS", "less_fried_foods"),
    goal("DRINKS LOW FAT OR SKIM MILK", "low_fat_milk"),
    goal("LOWERED SALT INTAKE", "lower_salt"),
    goal("RECEIVE AN ANNUAL CHECK-UP", "annual_checkup"),
    goal("QUIT SMOKING", "quit_smoking"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
}

impl SqlType {
    pub fn as_sql(self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
        }
    }
}

/// Conflict behaviour for a patient column when the identity key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// A non-null incoming value replaces the stored one.
    Overwrite,
    /// The stored value wins unless it is null (sticky fields).
    KeepExisting,
}

#[derive(Debug, Clone, Copy)]
pub struct PatientColumn {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub source: Field,
    pub merge: MergeRule,
}

const fn patient(
    name: &'static str,
    sql_type: SqlType,
    source: Field,
    merge: MergeRule,
) -> PatientColumn {
    PatientColumn {
        name,
        sql_type,
        source,
        merge,
    }
}

pub const PATIENT_KEY: &str = "client_id";
pub const PATIENT_BIRTHDATE: &str = "birthdate";

/// Columns written by the patient upsert, after the identity key. `birthdate`
/// is owned by the birthdate resolver and is not part of this list.
pub const PATIENT_COLUMNS: &[PatientColumn] = &[
    patient("first_name", SqlType::Text, Field::FirstName, MergeRule::Overwrite),
    patient("last_name", SqlType::Text, Field::LastName, MergeRule::Overwrite),
    patient("gender", SqlType::Text, Field::Gender, MergeRule::Overwrite),
    patient("age", SqlType::Integer, Field::Age, MergeRule::Overwrite),
    patient("race", SqlType::Text, Field::Race, MergeRule::Overwrite),
    patient("primary_lang", SqlType::Text, Field::PrimaryLang, MergeRule::Overwrite),
    patient("insurance", SqlType::Text, Field::Insurance, MergeRule::Overwrite),
    patient("phone", SqlType::Text, Field::Phone, MergeRule::Overwrite),
    patient("zipcode", SqlType::Text, Field::Zipcode, MergeRule::Overwrite),
    patient(
        "first_visit_date",
        SqlType::Text,
        Field::FirstScreenDate,
        MergeRule::KeepExisting,
    ),
    patient("height", SqlType::Real, Field::Height, MergeRule::KeepExisting),
];

/// Where a visit column's value comes from on the baseline and current records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitSource {
    /// Event/service metadata; forced null on baseline records and counted
    /// towards "has event data" on current records.
    Event(Field),
    /// Carried on current records only, without justifying one on its own.
    Annotation(Field),
    /// Measurement captured both at screening and as an updated value.
    Metric { baseline: Field, updated: Field },
    /// Measurement only captured at screening and copied onto both records.
    Carried(Field),
}

#[derive(Debug, Clone, Copy)]
pub struct VisitColumn {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub source: VisitSource,
}

impl VisitColumn {
    pub fn is_measurement(&self) -> bool {
        matches!(
            self.source,
            VisitSource::Metric { .. } | VisitSource::Carried(_)
        )
    }
}

const fn event(name: &'static str, field: Field) -> VisitColumn {
    VisitColumn {
        name,
        sql_type: SqlType::Text,
        source: VisitSource::Event(field),
    }
}

const fn metric(name: &'static str, sql_type: SqlType, baseline: Field, updated: Field) -> VisitColumn {
    VisitColumn {
        name,
        sql_type,
        source: VisitSource::Metric { baseline, updated },
    }
}

pub const VISIT_KEY: [&str; 2] = ["client_id", "visit_date"];

pub const VISIT_COLUMNS: &[VisitColumn] = &[
    event("event_type", Field::EventType),
    event("referral_source", Field::ReferralSource),
    event("follow_up", Field::FollowUp),
    event("hra", Field::Hra),
    event("edu", Field::Edu),
    event("case_management", Field::CaseManagement),
    metric("systolic", SqlType::Integer, Field::Systolic, Field::NewSystolic),
    metric("diastolic", SqlType::Integer, Field::Diastolic, Field::NewDiastolic),
    metric("cholesterol", SqlType::Integer, Field::Cholesterol, Field::NewCholesterol),
    metric("fasting", SqlType::Text, Field::Fasting, Field::NewFasting),
    metric("glucose", SqlType::Integer, Field::Glucose, Field::NewGlucose),
    VisitColumn {
        name: "height",
        sql_type: SqlType::Real,
        source: VisitSource::Carried(Field::Height),
    },
    metric("weight", SqlType::Real, Field::Weight, Field::NewWeight),
    metric("bmi", SqlType::Real, Field::Bmi, Field::NewBmi),
    metric("a1c", SqlType::Real, Field::A1c, Field::NewA1c),
    VisitColumn {
        name: "acquired_by",
        sql_type: SqlType::Text,
        source: VisitSource::Annotation(Field::AcquiredBy),
    },
];

/// Which visit columns a merge-update touches on an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeScope {
    Measurements,
    All,
}

impl MergeScope {
    pub fn includes(self, column: &VisitColumn) -> bool {
        match self {
            MergeScope::Measurements => column.is_measurement(),
            MergeScope::All => true,
        }
    }
}

fn placeholders(range: std::ops::RangeInclusive<usize>) -> String {
    range.map(|n| format!("?{n}")).join(", ")
}

pub fn create_schema_sql() -> String {
    let patient_columns = PATIENT_COLUMNS
        .iter()
        .map(|c| format!("    {} {}", c.name, c.sql_type.as_sql()))
        .join(",\n");
    let visit_columns = VISIT_COLUMNS
        .iter()
        .map(|c| format!("    {} {}", c.name, c.sql_type.as_sql()))
        .join(",\n");
    let goal_columns = GOAL_COLUMNS
        .iter()
        .map(|g| format!("    {} INTEGER NOT NULL DEFAULT 0", g.column))
        .join(",\n");
    format!(
        "CREATE TABLE IF NOT EXISTS {PATIENTS_TABLE} (
    {PATIENT_KEY} TEXT PRIMARY KEY,
{patient_columns},
    {PATIENT_BIRTHDATE} TEXT
);
CREATE TABLE IF NOT EXISTS {VISITS_TABLE} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id TEXT NOT NULL REFERENCES {PATIENTS_TABLE}({PATIENT_KEY}),
    visit_date TEXT NOT NULL,
{visit_columns},
    UNIQUE (client_id, visit_date)
);
CREATE TABLE IF NOT EXISTS {GOALS_TABLE} (
    client_id TEXT NOT NULL REFERENCES {PATIENTS_TABLE}({PATIENT_KEY}),
    visit_date TEXT NOT NULL,
    visit_id INTEGER REFERENCES {VISITS_TABLE}(id),
{goal_columns},
    PRIMARY KEY (client_id, visit_date)
);
"
    )
}

/// `?1` is the identity key, followed by [`PATIENT_COLUMNS`] in order.
pub fn patient_upsert_sql() -> String {
    let columns = PATIENT_COLUMNS.iter().map(|c| c.name).join(", ");
    let values = placeholders(1..=PATIENT_COLUMNS.len() + 1);
    let updates = PATIENT_COLUMNS
        .iter()
        .map(|c| match c.merge {
            MergeRule::Overwrite => format!(
                "{name} = COALESCE(excluded.{name}, {PATIENTS_TABLE}.{name})",
                name = c.name
            ),
            MergeRule::KeepExisting => format!(
                "{name} = COALESCE({PATIENTS_TABLE}.{name}, excluded.{name})",
                name = c.name
            ),
        })
        .join(",\n    ");
    format!(
        "INSERT INTO {PATIENTS_TABLE} ({PATIENT_KEY}, {columns})
VALUES ({values})
ON CONFLICT({PATIENT_KEY}) DO UPDATE SET
    {updates}"
    )
}

/// `?1`/`?2` are client id and visit date, followed by [`VISIT_COLUMNS`] in order.
pub fn visit_insert_sql() -> String {
    let columns = VISIT_COLUMNS.iter().map(|c| c.name).join(", ");
    let values = placeholders(1..=VISIT_COLUMNS.len() + 2);
    format!(
        "INSERT INTO {VISITS_TABLE} ({}, {}, {columns})\nVALUES ({values})",
        VISIT_KEY[0], VISIT_KEY[1]
    )
}

/// Partial merge: a null parameter leaves the stored value untouched. The
/// columns in scope come first, followed by client id and visit date.
pub fn visit_merge_sql(scope: MergeScope) -> String {
    let in_scope = VISIT_COLUMNS
        .iter()
        .filter(|c| scope.includes(c))
        .collect::<Vec<_>>();
    let assignments = in_scope
        .iter()
        .enumerate()
        .map(|(idx, c)| format!("{name} = COALESCE(?{n}, {name})", name = c.name, n = idx + 1))
        .join(",\n    ");
    let key_start = in_scope.len() + 1;
    format!(
        "UPDATE {VISITS_TABLE} SET\n    {assignments}\nWHERE {} = ?{} AND {} = ?{}",
        VISIT_KEY[0],
        key_start,
        VISIT_KEY[1],
        key_start + 1
    )
}

/// Existence probe for `pairs` (client id, visit date) keys.
pub fn visit_probe_sql(pairs: usize) -> String {
    let tuples = (0..pairs)
        .map(|idx| format!("(?{}, ?{})", idx * 2 + 1, idx * 2 + 2))
        .join(", ");
    format!(
        "SELECT {k0}, {k1} FROM {VISITS_TABLE} WHERE ({k0}, {k1}) IN (VALUES {tuples})",
        k0 = VISIT_KEY[0],
        k1 = VISIT_KEY[1]
    )
}

/// `?1`/`?2` are client id and visit date, followed by the goal flags in
/// [`GOAL_COLUMNS`] order. `visit_id` resolves against the visit sharing the key.
pub fn goal_upsert_sql() -> String {
    let columns = GOAL_COLUMNS.iter().map(|g| g.column).join(", ");
    let values = placeholders(3..=GOAL_COUNT + 2);
    let updates = GOAL_COLUMNS
        .iter()
        .map(|g| format!("{name} = excluded.{name}", name = g.column))
        .join(",\n    ");
    format!(
        "INSERT INTO {GOALS_TABLE} (client_id, visit_date, visit_id, {columns})
VALUES (?1, ?2, (SELECT id FROM {VISITS_TABLE} WHERE client_id = ?1 AND visit_date = ?2), {values})
ON CONFLICT(client_id, visit_date) DO UPDATE SET
    visit_id = excluded.visit_id,
    {updates}"
    )
}

pub const EXISTING_BIRTHDATES_SQL: &str =
    "SELECT client_id, birthdate FROM patients WHERE birthdate IS NOT NULL";
pub const BIRTHDATE_FILL_SQL: &str =
    "UPDATE patients SET birthdate = ?1 WHERE client_id = ?2 AND birthdate IS NULL";
pub const BIRTHDATE_UPDATE_SQL: &str = "UPDATE patients SET birthdate = ?1 WHERE client_id = ?2";
