#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clinic_import::config::ImportConfig;
use clinic_import::schema::{GOAL_COLUMNS, SOURCE_COLUMNS};
use rusqlite::Connection;
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn database(&self) -> PathBuf {
        self.path().join("patient_records.db")
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }
}

/// Fast retry settings so contention paths do not slow the suite down.
pub fn test_config(batch_size: usize, checkpoint_batches: usize) -> ImportConfig {
    ImportConfig {
        batch_size,
        checkpoint_batches,
        retry_base_delay: Duration::from_millis(1),
        ..ImportConfig::default()
    }
}

/// Builds a client list extract. Cells are addressed by the collapsed header
/// name; the repeated `FASTING`/`A1C` columns are addressed as `FASTING.1`
/// and `A1C.1` but written under their sheet names.
pub struct ClientList {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ClientList {
    pub fn new() -> Self {
        let headers = SOURCE_COLUMNS
            .iter()
            .map(|c| c.header.to_string())
            .chain(GOAL_COLUMNS.iter().map(|g| g.header.to_string()))
            .collect();
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, cells: &[(&str, &str)]) -> Self {
        let lookup = cells.iter().copied().collect::<HashMap<_, _>>();
        let row = self
            .headers
            .iter()
            .map(|h| lookup.get(h.as_str()).copied().unwrap_or("").to_string())
            .collect();
        for (header, _) in cells {
            assert!(
                self.headers.iter().any(|h| h == header),
                "unknown header {header}"
            );
        }
        self.rows.push(row);
        self
    }

    /// Appends a line whose field count does not match the header.
    pub fn malformed_row(mut self) -> Self {
        self.rows.push(vec!["BROKEN".to_string()]);
        self
    }

    pub fn to_csv(&self) -> String {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::new());
        let sheet_headers = self.headers.iter().map(|h| match h.as_str() {
            "FASTING.1" => "FASTING",
            "A1C.1" => "A1C",
            other => other,
        });
        writer.write_record(sheet_headers).expect("write headers");
        for row in &self.rows {
            writer.write_record(row).expect("write row");
        }
        String::from_utf8(writer.into_inner().expect("flush csv")).expect("utf8 csv")
    }

    pub fn write(&self, workspace: &TestWorkspace, name: &str) -> PathBuf {
        workspace.write(name, &self.to_csv())
    }
}

pub fn connect(path: &Path) -> Connection {
    Connection::open(path).expect("open store")
}

pub fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).expect("count query")
}
