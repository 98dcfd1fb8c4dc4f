//! TokenCache — TTL cache over token review outcomes.
//!
//! Both verdicts are cached: a valid entry carries the resolved
//! principal, an invalid entry is a negative result that shields the
//! reviewer from repeated bad tokens. The two verdicts expire on
//! independent TTLs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::service::Principal;

/// A cached review verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedOutcome {
    Valid(Principal),
    Invalid,
}

struct Entry {
    outcome: CachedOutcome,
    expires_at: Instant,
}

/// TTL cache keyed by raw token string.
pub struct TokenCache {
    valid_ttl: Duration,
    invalid_ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl TokenCache {
    pub fn new(valid_ttl: Duration, invalid_ttl: Duration) -> Self {
        Self {
            valid_ttl,
            invalid_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a token. Expired entries are removed on access.
    pub fn get(&self, token: &str) -> Option<CachedOutcome> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(token) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.outcome.clone()),
            Some(_) => {
                entries.remove(token);
                None
            }
            None => None,
        }
    }

    /// Record a verdict. The TTL depends on the verdict kind.
    pub fn put(&self, token: &str, outcome: CachedOutcome) {
        let ttl = match outcome {
            CachedOutcome::Valid(_) => self.valid_ttl,
            CachedOutcome::Invalid => self.invalid_ttl,
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            token.to_string(),
            Entry {
                outcome,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop every expired entry. Called periodically by the server's
    /// housekeeping task so abandoned tokens don't accumulate.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
