use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};
use rusqlite::Connection;

use crate::{
    error::{StoreError, StoreResult},
    retry::RetryExecutor,
    schema::{self, BIRTHDATE_FILL_SQL, EXISTING_BIRTHDATES_SQL},
};

const SESSION_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
";

/// The single-writer SQLite store an import run reads from and writes to.
pub struct Store {
    conn: Connection,
    path: PathBuf,
}

impl Store {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let open_error = |source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            // A missing directory surfaces as an open failure below.
            if let Err(err) = fs::create_dir_all(parent) {
                debug!(
                    "store_dir_unavailable path={} error=\"{err}\"",
                    parent.display()
                );
            }
        }
        let conn = Connection::open(path).map_err(open_error)?;
        conn.execute_batch(SESSION_PRAGMAS).map_err(open_error)?;
        debug!("store_opened path={}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Creates the three tables if they are absent. Safe to call on every run.
    pub fn ensure_schema(&self, retry: &RetryExecutor) -> StoreResult<()> {
        let ddl = schema::create_schema_sql();
        retry.run("create schema", || self.conn.execute_batch(&ddl))?;
        info!("schema_ready path={}", self.path.display());
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    pub fn begin(&self, retry: &RetryExecutor) -> StoreResult<()> {
        retry.run("begin", || self.conn.execute_batch("BEGIN"))
    }

    pub fn commit(&self, retry: &RetryExecutor) -> StoreResult<()> {
        retry.run("commit", || self.conn.execute_batch("COMMIT"))
    }

    /// Rolls back whatever is open; a no-op outside a transaction.
    pub fn rollback(&self) -> StoreResult<()> {
        if self.in_transaction() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    pub fn existing_birthdates(&self, retry: &RetryExecutor) -> StoreResult<Vec<(String, String)>> {
        retry.run("load birthdates", || {
            let mut stmt = self.conn.prepare(EXISTING_BIRTHDATES_SQL)?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
    }

    /// Sets the birthdate of an already stored patient whose birthdate is
    /// still null. Returns the number of rows touched (0 for unseen patients).
    pub fn fill_birthdate(
        &self,
        retry: &RetryExecutor,
        client_id: &str,
        birthdate: &str,
    ) -> StoreResult<usize> {
        retry.run("fill birthdate", || {
            let mut stmt = self.conn.prepare_cached(BIRTHDATE_FILL_SQL)?;
            stmt.execute([birthdate, client_id])
        })
    }
}
