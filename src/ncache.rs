/// Negative cache: short-lived record of keys a backend confirmed absent
use crate::error::{LookupError, LookupResult};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Membership test for recently confirmed absent keys
///
/// Calls never suspend; entries expire purely by TTL.
pub trait NegativeCache: Send + Sync {
    fn is_marked(&self, domain: &str, key: &str) -> LookupResult<bool>;

    fn mark(&self, domain: &str, key: &str, ttl: Duration) -> LookupResult<()>;

    /// Drop expired entries, returning how many were removed
    fn purge_expired(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process negative cache keyed by (domain, key)
#[derive(Debug, Default)]
pub struct MemoryNegativeCache {
    entries: RwLock<HashMap<(String, String), Instant>>,
}

impl MemoryNegativeCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NegativeCache for MemoryNegativeCache {
    fn is_marked(&self, domain: &str, key: &str) -> LookupResult<bool> {
        let entries = self
            .entries
            .read()
            .map_err(|_| LookupError::Internal("Negative cache lock poisoned".to_string()))?;

        Ok(entries
            .get(&(domain.to_string(), key.to_string()))
            .map_or(false, |expires| *expires > Instant::now()))
    }

    fn mark(&self, domain: &str, key: &str, ttl: Duration) -> LookupResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| LookupError::Internal("Negative cache lock poisoned".to_string()))?;

        entries.insert((domain.to_string(), key.to_string()), Instant::now() + ttl);
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };

        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, expires| *expires > now);
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}
