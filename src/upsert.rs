//! Batch upsert engine.
//!
//! Reconciled records accumulate in [`PendingBatches`] and are written by
//! [`UpsertEngine::flush`] in dependency order: patients, buffered
//! birthdates, baseline visits, current visits, goals. Visit batches are
//! probed for existing keys in chunks of [`PROBE_CHUNK_KEYS`] and split into
//! inserts and partial merges.

use std::{collections::HashSet, ops::AddAssign};

use log::{debug, info};
use rusqlite::{CachedStatement, Connection, ToSql};
use serde::Serialize;

use crate::{
    birthdate::BirthdateCache,
    error::StoreResult,
    reconcile::{GoalRecord, PatientRecord, Reconciled, VisitRecord},
    retry::RetryExecutor,
    schema::{
        self, BIRTHDATE_UPDATE_SQL, MergeScope, VISIT_COLUMNS, goal_upsert_sql,
        patient_upsert_sql, visit_insert_sql, visit_probe_sql,
    },
    store::Store,
};

/// Keeps the probe under SQLite's bound-parameter limit (two per key).
pub const PROBE_CHUNK_KEYS: usize = 100;

#[derive(Debug, Default)]
pub struct PendingBatches {
    pub patients: Vec<PatientRecord>,
    pub baseline: Vec<VisitRecord>,
    pub current: Vec<VisitRecord>,
    pub goals: Vec<GoalRecord>,
    rows: usize,
}

impl PendingBatches {
    pub fn push(&mut self, reconciled: Reconciled) {
        self.patients.push(reconciled.patient);
        self.baseline.extend(reconciled.baseline);
        self.current.extend(reconciled.current);
        self.goals.extend(reconciled.goals);
        self.rows += 1;
    }

    /// Rows accumulated since the last flush.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushStats {
    pub patients: usize,
    pub visits_inserted: usize,
    pub visits_updated: usize,
    pub goals: usize,
    pub birthdates: usize,
}

impl AddAssign for FlushStats {
    fn add_assign(&mut self, rhs: Self) {
        self.patients += rhs.patients;
        self.visits_inserted += rhs.visits_inserted;
        self.visits_updated += rhs.visits_updated;
        self.goals += rhs.goals;
        self.birthdates += rhs.birthdates;
    }
}

/// Statements are built once from the schema descriptor and reused for every
/// flush through the connection's statement cache.
#[derive(Debug)]
pub struct UpsertEngine {
    birthdate_batch_size: usize,
    patient_sql: String,
    visit_insert_sql: String,
    baseline_merge_sql: String,
    current_merge_sql: String,
    goal_sql: String,
}

impl UpsertEngine {
    pub fn new(birthdate_batch_size: usize) -> Self {
        Self {
            birthdate_batch_size: birthdate_batch_size.max(1),
            patient_sql: patient_upsert_sql(),
            visit_insert_sql: visit_insert_sql(),
            baseline_merge_sql: schema::visit_merge_sql(MergeScope::Measurements),
            current_merge_sql: schema::visit_merge_sql(MergeScope::All),
            goal_sql: goal_upsert_sql(),
        }
    }

    /// Writes and drains every pending batch. With `force_birthdates` the
    /// birthdate buffer is written regardless of its size.
    pub fn flush(
        &self,
        store: &Store,
        retry: &RetryExecutor,
        pending: &mut PendingBatches,
        birthdates: &mut BirthdateCache,
        force_birthdates: bool,
    ) -> StoreResult<FlushStats> {
        let conn = store.connection();
        let mut stats = FlushStats {
            patients: self.upsert_patients(conn, retry, &pending.patients)?,
            ..FlushStats::default()
        };
        if force_birthdates || birthdates.pending_len() >= self.birthdate_batch_size {
            stats.birthdates = self.flush_birthdates(store, retry, birthdates)?;
        }
        let (inserted, updated) =
            self.upsert_visits(conn, retry, &pending.baseline, MergeScope::Measurements)?;
        stats.visits_inserted += inserted;
        stats.visits_updated += updated;
        let (inserted, updated) = self.upsert_visits(conn, retry, &pending.current, MergeScope::All)?;
        stats.visits_inserted += inserted;
        stats.visits_updated += updated;
        stats.goals = self.upsert_goals(conn, retry, &pending.goals)?;
        pending.clear();

        info!(
            "batch_flushed patients={} visits_inserted={} visits_updated={} goals={} birthdates={}",
            stats.patients, stats.visits_inserted, stats.visits_updated, stats.goals, stats.birthdates
        );
        Ok(stats)
    }

    /// Writes the buffered birthdates. Patients must already be flushed.
    pub fn flush_birthdates(
        &self,
        store: &Store,
        retry: &RetryExecutor,
        birthdates: &mut BirthdateCache,
    ) -> StoreResult<usize> {
        let buffered = birthdates.take_pending();
        if buffered.is_empty() {
            return Ok(0);
        }
        let conn = store.connection();
        let mut stmt = prepare(conn, retry, BIRTHDATE_UPDATE_SQL)?;
        for (client_id, birthdate) in &buffered {
            retry.run("update birthdate", || stmt.execute([birthdate, client_id]))?;
        }
        debug!("birthdates_written count={}", buffered.len());
        Ok(buffered.len())
    }

    fn upsert_patients(
        &self,
        conn: &Connection,
        retry: &RetryExecutor,
        patients: &[PatientRecord],
    ) -> StoreResult<usize> {
        if patients.is_empty() {
            return Ok(0);
        }
        let mut stmt = prepare(conn, retry, &self.patient_sql)?;
        for patient in patients {
            let mut params: Vec<&dyn ToSql> = Vec::with_capacity(patient.values.len() + 1);
            params.push(&patient.client_id);
            params.extend(patient.values.iter().map(|v| v as &dyn ToSql));
            retry.run("upsert patient", || stmt.execute(params.as_slice()))?;
        }
        Ok(patients.len())
    }

    /// Returns `(inserted, updated)`.
    fn upsert_visits(
        &self,
        conn: &Connection,
        retry: &RetryExecutor,
        visits: &[VisitRecord],
        scope: MergeScope,
    ) -> StoreResult<(usize, usize)> {
        let merge_sql = match scope {
            MergeScope::Measurements => &self.baseline_merge_sql,
            MergeScope::All => &self.current_merge_sql,
        };
        let mut inserted = 0;
        let mut updated = 0;
        for chunk in visits.chunks(PROBE_CHUNK_KEYS) {
            let mut existing = probe_existing(conn, retry, chunk)?;
            let mut insert = prepare(conn, retry, &self.visit_insert_sql)?;
            let mut merge = prepare(conn, retry, merge_sql)?;
            for visit in chunk {
                let key = (visit.client_id.clone(), visit.visit_date.clone());
                if existing.contains(&key) {
                    let mut params: Vec<&dyn ToSql> = VISIT_COLUMNS
                        .iter()
                        .zip(visit.values.iter())
                        .filter(|(column, _)| scope.includes(column))
                        .map(|(_, value)| value as &dyn ToSql)
                        .collect();
                    params.push(&visit.client_id);
                    params.push(&visit.visit_date);
                    retry.run("merge visit", || merge.execute(params.as_slice()))?;
                    updated += 1;
                } else {
                    let mut params: Vec<&dyn ToSql> = vec![&visit.client_id as &dyn ToSql, &visit.visit_date];
                    params.extend(visit.values.iter().map(|v| v as &dyn ToSql));
                    retry.run("insert visit", || insert.execute(params.as_slice()))?;
                    // A later record in the same chunk for this key merges.
                    existing.insert(key);
                    inserted += 1;
                }
            }
        }
        Ok((inserted, updated))
    }

    fn upsert_goals(
        &self,
        conn: &Connection,
        retry: &RetryExecutor,
        goals: &[GoalRecord],
    ) -> StoreResult<usize> {
        if goals.is_empty() {
            return Ok(0);
        }
        let mut stmt = prepare(conn, retry, &self.goal_sql)?;
        for goal in goals {
            let flags = goal.flags.as_ints();
            let mut params: Vec<&dyn ToSql> = vec![&goal.client_id as &dyn ToSql, &goal.visit_date];
            params.extend(flags.iter().map(|f| f as &dyn ToSql));
            retry.run("upsert goals", || stmt.execute(params.as_slice()))?;
        }
        Ok(goals.len())
    }
}

fn prepare<'c>(
    conn: &'c Connection,
    retry: &RetryExecutor,
    sql: &str,
) -> StoreResult<CachedStatement<'c>> {
    retry.run("prepare", || conn.prepare_cached(sql))
}

fn probe_existing(
    conn: &Connection,
    retry: &RetryExecutor,
    chunk: &[VisitRecord],
) -> StoreResult<HashSet<(String, String)>> {
    if chunk.is_empty() {
        return Ok(HashSet::new());
    }
    let sql = visit_probe_sql(chunk.len());
    let params = chunk
        .iter()
        .flat_map(|v| [&v.client_id as &dyn ToSql, &v.visit_date as &dyn ToSql])
        .collect::<Vec<_>>();
    retry.run("probe visits", || {
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    })
}
