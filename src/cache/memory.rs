//! In-process backend with Redis-like semantics.
//!
//! Used by tests and by single-node development runs where no Redis URL is
//! configured. Expired entries are dropped lazily on access.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::KvBackend;
use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Mutex-guarded map implementing [`KvBackend`].
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    /// Whether no live keys remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time-to-live of a key, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let (current, expires_at) = match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                let parsed = entry
                    .value
                    .parse::<i64>()
                    .map_err(|_| CacheError::InvalidValue {
                        key: key.to_string(),
                    })?;
                (parsed, entry.expires_at)
            }
            _ => (0, None),
        };

        let next = current + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// A backend whose every call fails, for exercising fail-open paths.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct UnreachableBackend;

#[cfg(test)]
#[async_trait]
impl KvBackend for UnreachableBackend {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(CacheError::unavailable("GET", "connection refused"))
    }
    async fn incr(&self, _key: &str) -> CacheResult<i64> {
        Err(CacheError::unavailable("INCR", "connection refused"))
    }
    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> CacheResult<()> {
        Err(CacheError::unavailable("SET", "connection refused"))
    }
    async fn del(&self, _key: &str) -> CacheResult<bool> {
        Err(CacheError::unavailable("DEL", "connection refused"))
    }
    async fn ping(&self) -> CacheResult<()> {
        Err(CacheError::unavailable("PING", "connection refused"))
    }
    fn backend_name(&self) -> &'static str {
        "unreachable"
    }
}
