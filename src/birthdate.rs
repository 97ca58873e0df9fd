//! Birthdate derivation from identity keys, and the per-run cache that keeps
//! each key from being derived and written more than once.
//!
//! A key encodes the birthdate in its last six characters as `MMDDYY`. Keys
//! shorter than [`MIN_KEY_LEN`] or whose suffix is not all digits have no
//! derivable birthdate; that is "unknown", not an error.

use std::collections::HashMap;

use log::{debug, info};

use crate::{error::StoreResult, retry::RetryExecutor, store::Store};

pub const MIN_KEY_LEN: usize = 8;
const SUFFIX_LEN: usize = 6;

/// `JD0124032090` → `03/20/90`.
pub fn derive_birthdate(client_id: &str) -> Option<String> {
    let chars = client_id.chars().collect::<Vec<_>>();
    if chars.len() < MIN_KEY_LEN {
        return None;
    }
    let suffix = &chars[chars.len() - SUFFIX_LEN..];
    if !suffix.iter().all(char::is_ascii_digit) {
        return None;
    }
    let part = |range: std::ops::Range<usize>| suffix[range].iter().collect::<String>();
    Some(format!("{}/{}/{}", part(0..2), part(2..4), part(4..6)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Already known from the store or an earlier row.
    Cached(String),
    /// Derived for the first time during this run.
    Derived(String),
    Unknown,
}

impl Resolution {
    pub fn into_value(self) -> Option<String> {
        match self {
            Resolution::Cached(value) | Resolution::Derived(value) => Some(value),
            Resolution::Unknown => None,
        }
    }
}

/// Explicit cache object owned by one import run.
#[derive(Debug, Default)]
pub struct BirthdateCache {
    known: HashMap<String, String>,
    pending: Vec<(String, String)>,
    uncommitted: Vec<String>,
}

impl BirthdateCache {
    /// Pre-loads every non-null birthdate already in the store.
    pub fn load(store: &Store, retry: &RetryExecutor) -> StoreResult<Self> {
        let known = store
            .existing_birthdates(retry)?
            .into_iter()
            .collect::<HashMap<_, _>>();
        info!("birthdates_loaded count={}", known.len());
        Ok(Self {
            known,
            ..Self::default()
        })
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn get(&self, client_id: &str) -> Option<&str> {
        self.known.get(client_id).map(String::as_str)
    }

    /// Consults the cache, deriving on a miss. A derived value is cached and
    /// queued for the next batched write.
    pub fn resolve(&mut self, client_id: &str) -> Resolution {
        if let Some(value) = self.known.get(client_id) {
            return Resolution::Cached(value.clone());
        }
        match derive_birthdate(client_id) {
            Some(value) => {
                self.known.insert(client_id.to_string(), value.clone());
                self.pending.push((client_id.to_string(), value.clone()));
                self.uncommitted.push(client_id.to_string());
                Resolution::Derived(value)
            }
            None => Resolution::Unknown,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drains the write buffer as `(client_id, birthdate)` pairs.
    pub fn take_pending(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.pending)
    }

    /// Everything derived so far is now durable.
    pub fn commit(&mut self) {
        self.uncommitted.clear();
    }

    /// Forgets values derived since the last commit so a later file derives
    /// and writes them again. Returns the number of evicted keys.
    pub fn rollback(&mut self) -> usize {
        self.pending.clear();
        let evicted = self.uncommitted.len();
        for key in self.uncommitted.drain(..) {
            self.known.remove(&key);
        }
        if evicted > 0 {
            debug!("birthdates_evicted count={evicted}");
        }
        evicted
    }
}

/// Resolves a row's birthdate, filling it in immediately on an already stored
/// patient whose birthdate is still null.
pub fn resolve_birthdate(
    cache: &mut BirthdateCache,
    store: &Store,
    retry: &RetryExecutor,
    client_id: &str,
) -> StoreResult<Option<String>> {
    let resolution = cache.resolve(client_id);
    if let Resolution::Derived(value) = &resolution {
        store.fill_birthdate(retry, client_id, value)?;
    }
    Ok(resolution.into_value())
}
