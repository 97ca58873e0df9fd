pub mod birthdate;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod io_utils;
pub mod normalize;
pub mod pipeline;
pub mod reconcile;
pub mod retry;
pub mod schema;
pub mod store;
pub mod table;
pub mod upsert;
pub mod verify;
pub mod workbook;

use std::{env, fs::OpenOptions, path::Path, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{Cli, Commands},
    config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_MS, ImportConfig},
    pipeline::InputOptions,
    retry::RetryExecutor,
    store::Store,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let file = match log_file {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Opening log file {path:?}"))?,
        ),
        None => None,
    };
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("clinic_import", LevelFilter::Info);
        }
        if let Some(file) = file {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;
    match cli.command {
        Commands::Import(args) => handle_import(&args),
        Commands::Init(args) => handle_init(&args),
        Commands::Verify(args) => verify::execute(&args),
    }
}

fn handle_import(args: &cli::ImportArgs) -> Result<()> {
    let config = ImportConfig::from_args(args)?;
    let input = InputOptions {
        delimiter: args.delimiter,
        encoding: io_utils::resolve_encoding(args.input_encoding.as_deref())?,
    };
    info!(
        "import_started database={} files={} batch_size={} checkpoint_rows={}",
        args.database.display(),
        args.inputs.len(),
        config.batch_size,
        config.checkpoint_rows()
    );
    let summary = pipeline::run_import(&args.database, &args.inputs, config, &input)?;
    print!("{}", table::render_summary(&summary));
    if let Some(path) = &args.summary {
        summary.save(path)?;
        info!("summary_written path={}", path.display());
    }
    let failed = summary.failed_count();
    if failed > 0 {
        bail!(
            "{failed} of {} file(s) failed to import",
            summary.files.len()
        );
    }
    Ok(())
}

fn handle_init(args: &cli::InitArgs) -> Result<()> {
    let retry = RetryExecutor::new(
        DEFAULT_MAX_ATTEMPTS,
        std::time::Duration::from_millis(DEFAULT_RETRY_BASE_MS),
    );
    let store = Store::open(&args.database)
        .with_context(|| format!("Opening store {:?}", args.database))?;
    store
        .ensure_schema(&retry)
        .with_context(|| format!("Creating schema in {:?}", args.database))?;
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
