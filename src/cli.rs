use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_BIRTHDATE_BATCH_SIZE, DEFAULT_CHECKPOINT_BATCHES,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_MS,
};

pub const DEFAULT_DATABASE: &str = "patient_records.db";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Reconcile clinic-visit spreadsheet extracts into a SQLite patient store",
    long_about = None
)]
pub struct Cli {
    /// Append log records to this file instead of stderr
    #[arg(long = "log-file", env = "IMPORT_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import one or more client list extracts into the store
    Import(ImportArgs),
    /// Create the store schema if it does not exist yet
    Init(InitArgs),
    /// Check extracts against the client list column layout without importing
    Verify(VerifyArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Extract files to import, in order (repeatable or comma separated)
    #[arg(
        short = 'i',
        long = "input",
        env = "IMPORT_FILES",
        required = true,
        value_delimiter = ',',
        action = clap::ArgAction::Append
    )]
    pub inputs: Vec<PathBuf>,
    /// SQLite store file
    #[arg(short = 'd', long = "database", env = "DB_FILE", default_value = DEFAULT_DATABASE)]
    pub database: PathBuf,
    /// Rows accumulated before a batch flush
    #[arg(long = "batch-size", env = "IMPORT_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    /// Attempts per store operation while the store is busy or locked
    #[arg(long = "max-attempts", env = "IMPORT_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    /// Initial retry delay in milliseconds, doubled after each busy attempt
    #[arg(long = "retry-base-ms", env = "IMPORT_RETRY_BASE_MS", default_value_t = DEFAULT_RETRY_BASE_MS)]
    pub retry_base_ms: u64,
    /// Derived birthdates buffered before a batched write
    #[arg(
        long = "birthdate-batch-size",
        env = "IMPORT_BIRTHDATE_BATCH_SIZE",
        default_value_t = DEFAULT_BIRTHDATE_BATCH_SIZE
    )]
    pub birthdate_batch_size: usize,
    /// Batches between intermediate commits inside one file
    #[arg(
        long = "checkpoint-batches",
        env = "IMPORT_CHECKPOINT_BATCHES",
        default_value_t = DEFAULT_CHECKPOINT_BATCHES
    )]
    pub checkpoint_batches: usize,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Write the run summary as JSON to this path
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// SQLite store file
    #[arg(short = 'd', long = "database", env = "DB_FILE", default_value = DEFAULT_DATABASE)]
    pub database: PathBuf,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// One or more extract files to verify
    #[arg(short = 'i', long = "input", required = true, action = clap::ArgAction::Append)]
    pub inputs: Vec<PathBuf>,
    /// CSV delimiter character
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding for input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
