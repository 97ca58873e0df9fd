use std::time::Duration;

use anyhow::{Result, ensure};

use crate::cli::ImportArgs;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_MS: u64 = 500;
pub const DEFAULT_BIRTHDATE_BATCH_SIZE: usize = 50;
pub const DEFAULT_CHECKPOINT_BATCHES: usize = 10;

/// Tuning knobs shared by the retry executor, the upsert engine and the
/// file-scoped transaction controller for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub birthdate_batch_size: usize,
    pub checkpoint_batches: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            birthdate_batch_size: DEFAULT_BIRTHDATE_BATCH_SIZE,
            checkpoint_batches: DEFAULT_CHECKPOINT_BATCHES,
        }
    }
}

impl ImportConfig {
    pub fn from_args(args: &ImportArgs) -> Result<Self> {
        let config = Self {
            batch_size: args.batch_size,
            max_attempts: args.max_attempts,
            retry_base_delay: Duration::from_millis(args.retry_base_ms),
            birthdate_batch_size: args.birthdate_batch_size,
            checkpoint_batches: args.checkpoint_batches,
        };
        config.ensure_valid()?;
        Ok(config)
    }

    pub fn ensure_valid(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "Batch size must be at least 1");
        ensure!(self.max_attempts > 0, "Max attempts must be at least 1");
        ensure!(
            self.birthdate_batch_size > 0,
            "Birthdate batch size must be at least 1"
        );
        ensure!(
            self.checkpoint_batches > 0,
            "Checkpoint interval must be at least 1 batch"
        );
        Ok(())
    }

    /// Rows processed between intermediate commits inside one file.
    pub fn checkpoint_rows(&self) -> usize {
        self.batch_size.saturating_mul(self.checkpoint_batches)
    }
}
