//! File-scoped import pipeline.
//!
//! Each extract is processed inside one transaction. Every
//! `batch_size × checkpoint_batches` rows the transaction is committed and a
//! new one begun, so a later failure in the same file only discards work since
//! the last checkpoint. A failing file is rolled back, recorded in the
//! [`ImportSummary`], and the run moves on to the next file.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use encoding_rs::{Encoding, UTF_8};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::{
    birthdate::{self, BirthdateCache},
    config::ImportConfig,
    io_utils::{self, ExtractRow},
    normalize::{HeaderMap, normalize_row},
    printable_delimiter,
    reconcile::reconcile,
    retry::RetryExecutor,
    schema::CLIENT_LIST_SHEET,
    store::Store,
    upsert::{FlushStats, PendingBatches, UpsertEngine},
    workbook,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileStatus {
    Committed,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file: PathBuf,
    pub status: FileStatus,
    pub rows_read: usize,
    pub rows_skipped: usize,
    #[serde(flatten)]
    pub counts: FlushStats,
    pub checkpoints: usize,
}

impl FileOutcome {
    fn new(file: &Path) -> Self {
        Self {
            file: file.to_path_buf(),
            status: FileStatus::Committed,
            rows_read: 0,
            rows_skipped: 0,
            counts: FlushStats::default(),
            checkpoints: 0,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.status == FileStatus::Committed
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub files: Vec<FileOutcome>,
}

impl ImportSummary {
    pub fn totals(&self) -> FlushStats {
        let mut totals = FlushStats::default();
        for outcome in &self.files {
            totals += outcome.counts;
        }
        totals
    }

    pub fn rows_read(&self) -> usize {
        self.files.iter().map(|f| f.rows_read).sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| !f.is_committed())
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating summary file {path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Writing summary to {path:?}"))?;
        Ok(())
    }
}

/// How delimited extracts are read: explicit delimiter (else by extension)
/// and encoding. Workbooks ignore both.
#[derive(Debug, Clone, Copy)]
pub struct InputOptions {
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: UTF_8,
        }
    }
}

/// One import run: the store, its retry policy, and the run's birthdate cache.
pub struct Importer {
    store: Store,
    retry: RetryExecutor,
    config: ImportConfig,
    birthdates: BirthdateCache,
    engine: UpsertEngine,
}

impl Importer {
    /// Opens the store, creates the schema and loads known birthdates. Any
    /// failure here is fatal to the run.
    pub fn open(database: &Path, config: ImportConfig) -> Result<Self> {
        config.ensure_valid()?;
        let store =
            Store::open(database).with_context(|| format!("Opening store {database:?}"))?;
        Self::with_store(store, config)
    }

    pub fn with_store(store: Store, config: ImportConfig) -> Result<Self> {
        let retry = RetryExecutor::from_config(&config);
        store
            .ensure_schema(&retry)
            .with_context(|| format!("Creating schema in {:?}", store.path()))?;
        let birthdates =
            BirthdateCache::load(&store, &retry).context("Loading existing birthdates")?;
        let engine = UpsertEngine::new(config.birthdate_batch_size);
        Ok(Self {
            store,
            retry,
            config,
            birthdates,
            engine,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn birthdates(&self) -> &BirthdateCache {
        &self.birthdates
    }

    /// Imports files in the order given. Per-file failures are recorded in
    /// the summary rather than returned.
    pub fn import_files(&mut self, files: &[PathBuf], input: &InputOptions) -> ImportSummary {
        let mut summary = ImportSummary::default();
        for (idx, path) in files.iter().enumerate() {
            info!(
                "file_started file={} index={}/{}",
                path.display(),
                idx + 1,
                files.len()
            );
            summary.files.push(self.import_file(path, input));
        }
        let totals = summary.totals();
        info!(
            "import_finished files={} failed={} rows={} patients={} visits_inserted={} visits_updated={} goals={} birthdates={} retries={}",
            summary.files.len(),
            summary.failed_count(),
            summary.rows_read(),
            totals.patients,
            totals.visits_inserted,
            totals.visits_updated,
            totals.goals,
            totals.birthdates,
            self.retry.retries()
        );
        summary
    }

    pub fn import_file(&mut self, path: &Path, input: &InputOptions) -> FileOutcome {
        let mut outcome = FileOutcome::new(path);
        match self.process_file(path, input, &mut outcome) {
            Ok(()) => {
                info!(
                    "file_committed file={} rows={} skipped={} checkpoints={}",
                    path.display(),
                    outcome.rows_read,
                    outcome.rows_skipped,
                    outcome.checkpoints
                );
            }
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback() {
                    warn!(
                        "rollback_failed file={} error=\"{rollback_err}\"",
                        path.display()
                    );
                }
                let evicted = self.birthdates.rollback();
                error!(
                    "file_failed file={} rows={} checkpoints={} evicted_birthdates={evicted} error=\"{err:#}\"",
                    path.display(),
                    outcome.rows_read,
                    outcome.checkpoints
                );
                outcome.status = FileStatus::Failed {
                    error: format!("{err:#}"),
                };
            }
        }
        outcome
    }

    fn process_file(
        &mut self,
        path: &Path,
        input: &InputOptions,
        outcome: &mut FileOutcome,
    ) -> Result<()> {
        self.store.begin(&self.retry)?;

        if workbook::is_workbook(path) {
            debug!(
                "reading file={} sheet=\"{CLIENT_LIST_SHEET}\"",
                path.display()
            );
        } else {
            debug!(
                "reading file={} delimiter='{}' encoding={}",
                path.display(),
                printable_delimiter(io_utils::resolve_input_delimiter(path, input.delimiter)),
                input.encoding.name()
            );
        }
        let extract = io_utils::open_extract(path, input.delimiter, input.encoding)?;
        let map = HeaderMap::resolve(extract.headers())
            .with_context(|| format!("Resolving columns in {path:?}"))?;
        let missing_goals = map.missing_goals();
        if !missing_goals.is_empty() {
            debug!(
                "goal_columns_missing file={} count={}",
                path.display(),
                missing_goals.len()
            );
        }

        let checkpoint_rows = self.config.checkpoint_rows();
        let mut pending = PendingBatches::default();
        let mut since_checkpoint = 0usize;
        for (row_idx, record) in extract.enumerate() {
            let line = row_idx + 2;
            let record = record.with_context(|| format!("Reading row {line} in {path:?}"))?;
            outcome.rows_read += 1;

            let cells = match record {
                ExtractRow::Cells(cells) => cells,
                ExtractRow::Unreadable(reason) => {
                    warn!(
                        "row_skipped file={} row={line} reason=\"{reason}\"",
                        path.display()
                    );
                    outcome.rows_skipped += 1;
                    continue;
                }
            };
            let Some(row) = normalize_row(&map, &cells) else {
                outcome.rows_skipped += 1;
                continue;
            };
            birthdate::resolve_birthdate(
                &mut self.birthdates,
                &self.store,
                &self.retry,
                row.client_id(),
            )?;
            pending.push(reconcile(&row));

            if pending.rows() >= self.config.batch_size {
                since_checkpoint += pending.rows();
                outcome.counts += self.engine.flush(
                    &self.store,
                    &self.retry,
                    &mut pending,
                    &mut self.birthdates,
                    false,
                )?;
                if since_checkpoint >= checkpoint_rows {
                    outcome.counts.birthdates += self.checkpoint()?;
                    outcome.checkpoints += 1;
                    since_checkpoint = 0;
                    info!(
                        "checkpoint file={} rows={} checkpoints={}",
                        path.display(),
                        outcome.rows_read,
                        outcome.checkpoints
                    );
                }
            }
        }

        outcome.counts += self.engine.flush(
            &self.store,
            &self.retry,
            &mut pending,
            &mut self.birthdates,
            true,
        )?;
        self.store.commit(&self.retry)?;
        self.birthdates.commit();
        Ok(())
    }

    /// Commits the open transaction and begins the next one. Buffered
    /// birthdates are written first so the commit covers them.
    fn checkpoint(&mut self) -> Result<usize> {
        let written = self
            .engine
            .flush_birthdates(&self.store, &self.retry, &mut self.birthdates)?;
        self.store.commit(&self.retry)?;
        self.birthdates.commit();
        self.store.begin(&self.retry)?;
        Ok(written)
    }
}

/// Runs one import over `files`. Returns `Err` only when the run cannot start.
pub fn run_import(
    database: &Path,
    files: &[PathBuf],
    config: ImportConfig,
    input: &InputOptions,
) -> Result<ImportSummary> {
    let mut importer = Importer::open(database, config)?;
    Ok(importer.import_files(files, input))
}
