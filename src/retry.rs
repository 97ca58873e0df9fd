use std::{cell::Cell, thread, time::Duration};

use log::warn;

use crate::{
    config::ImportConfig,
    error::{StoreError, StoreResult, is_transient},
};

/// Runs store operations with bounded exponential backoff on busy/locked
/// failures. Every other error is returned on first sight.
#[derive(Debug)]
pub struct RetryExecutor {
    max_attempts: u32,
    base_delay: Duration,
    retries: Cell<u64>,
}

impl RetryExecutor {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            retries: Cell::new(0),
        }
    }

    pub fn from_config(config: &ImportConfig) -> Self {
        Self::new(config.max_attempts, config.retry_base_delay)
    }

    /// Delay before retrying after the given 1-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Number of retries performed so far across all operations.
    pub fn retries(&self) -> u64 {
        self.retries.get()
    }

    pub fn run<T, F>(&self, op: &'static str, mut f: F) -> StoreResult<T>
    where
        F: FnMut() -> rusqlite::Result<T>,
    {
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) => {
                    if attempt >= self.max_attempts {
                        warn!(
                            "retry_exhausted op={op} attempts={attempt} error=\"{err}\""
                        );
                        return Err(StoreError::Busy {
                            op,
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        "store_busy op={op} attempt={attempt}/{} delay_ms={}",
                        self.max_attempts,
                        delay.as_millis()
                    );
                    self.retries.set(self.retries.get() + 1);
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(StoreError::Sqlite(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;
    use std::time::Instant;

    /// Records log lines per thread so parallel tests only see their own.
    mod capture {
        use std::{
            sync::{Mutex, Once},
            thread::{self, ThreadId},
        };

        struct Capture(Mutex<Vec<(ThreadId, String)>>);

        static LOGGER: Capture = Capture(Mutex::new(Vec::new()));

        impl log::Log for Capture {
            fn enabled(&self, _: &log::Metadata<'_>) -> bool {
                true
            }

            fn log(&self, record: &log::Record<'_>) {
                self.0
                    .lock()
                    .unwrap()
                    .push((thread::current().id(), record.args().to_string()));
            }

            fn flush(&self) {}
        }

        pub fn install() {
            static INIT: Once = Once::new();
            INIT.call_once(|| {
                log::set_logger(&LOGGER).unwrap();
                log::set_max_level(log::LevelFilter::Trace);
            });
        }

        pub fn lines() -> Vec<String> {
            let id = thread::current().id();
            LOGGER
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|(thread, _)| *thread == id)
                .map(|(_, line)| line.clone())
                .collect()
        }
    }

    fn busy() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        )
    }

    #[test]
    fn succeeds_after_two_busy_attempts_with_backoff() {
        let base = Duration::from_millis(20);
        let retry = RetryExecutor::new(3, base);
        let mut calls = 0;
        let started = Instant::now();
        capture::install();
        let value = retry
            .run("insert_visits", || {
                calls += 1;
                if calls < 3 { Err(busy()) } else { Ok(42) }
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls, 3);
        assert_eq!(retry.retries(), 2);
        assert!(started.elapsed() >= base + base * 2);

        let busy_lines: Vec<String> = capture::lines()
            .into_iter()
            .filter(|line| line.starts_with("store_busy op=insert_visits"))
            .collect();
        assert_eq!(
            busy_lines,
            vec![
                "store_busy op=insert_visits attempt=1/3 delay_ms=20".to_string(),
                "store_busy op=insert_visits attempt=2/3 delay_ms=40".to_string(),
            ]
        );
    }

    #[test]
    fn exhaustion_carries_the_original_error() {
        let retry = RetryExecutor::new(2, Duration::from_millis(1));
        let mut calls = 0;
        let err = retry
            .run("insert visit", || -> rusqlite::Result<()> {
                calls += 1;
                Err(busy())
            })
            .unwrap_err();
        assert_eq!(calls, 2);
        match err {
            StoreError::Busy {
                op,
                attempts,
                source,
            } => {
                assert_eq!(op, "insert visit");
                assert_eq!(attempts, 2);
                assert!(is_transient(&source));
            }
            other => panic!("expected busy error, got {other:?}"),
        }
    }

    #[test]
    fn non_transient_errors_are_not_retried() {
        let retry = RetryExecutor::new(5, Duration::from_millis(1));
        let mut calls = 0;
        let err = retry
            .run("lookup", || -> rusqlite::Result<()> {
                calls += 1;
                Err(rusqlite::Error::QueryReturnedNoRows)
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(retry.retries(), 0);
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let retry = RetryExecutor::new(4, Duration::from_millis(500));
        assert_eq!(retry.delay_for(1), Duration::from_millis(500));
        assert_eq!(retry.delay_for(2), Duration::from_millis(1000));
        assert_eq!(retry.delay_for(3), Duration::from_millis(2000));
    }
}
