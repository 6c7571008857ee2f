//! Key store contract consumed by the repository, plus an in-process implementation.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{CacheableRow, Identity, StorageError};

/// Observability counters reported by a key store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyStoreStats {
    /// Number of reads that found a value.
    pub hits: u64,
    /// Cumulative time spent in key store calls.
    pub execution_time: Duration,
}

/// Simple key/value cache.
///
/// A TTL of zero means the entry never expires. Client failures surface as
/// [`StorageError::Cache`].
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Value stored for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`. Returns whether the store accepted it.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StorageError>;

    /// Remove `key`. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Add `delta` to the counter at `key`, creating it with `initial` when absent.
    async fn increment(
        &self,
        key: &str,
        delta: i64,
        initial: i64,
        ttl: Duration,
    ) -> Result<i64, StorageError>;

    /// Refresh the expiry of `key`. Returns whether the key exists.
    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool, StorageError>;

    fn stats(&self) -> KeyStoreStats;

    /// Row for `table`/`id`, populated from the cache when a copy is stored.
    async fn entity_cache(
        &self,
        table: &str,
        id: &Identity,
        ttl: Duration,
    ) -> Result<CacheableRow, StorageError> {
        let mut row = CacheableRow::new(table, id.clone(), ttl);
        row.load(self).await?;
        Ok(row)
    }
}

/// Cache key of an entity: table name and the ordered id values.
///
/// Every component is length-prefixed, so two keys are equal exactly when the
/// table and the ordered values are equal.
pub fn entity_cache_key(table: &str, id: &Identity) -> String {
    let mut key = format!("entity:{}:{}", table.len(), table);
    for (_, value) in id.iter() {
        match value.to_raw() {
            Some(raw) => {
                let _ = write!(key, "|{}:{}", raw.len(), raw);
            }
            None => key.push_str("|~"),
        }
    }
    key
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

fn expiry(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Some(Instant::now() + ttl)
    }
}

/// Writes drop every expired entry, so keys that are never read again do
/// not accumulate.
fn purge_expired(entries: &mut HashMap<String, Entry>, now: Instant) {
    entries.retain(|_, entry| entry.is_live(now));
}

/// In-process key store with expiring entries.
///
/// Nothing is shared across processes; suitable for tests and single-process
/// deployments.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, Entry>>,
    hits: AtomicU64,
    execution_nanos: AtomicU64,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    fn record(&self, started: Instant) {
        let nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.execution_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let started = Instant::now();
        let mut entries = self.entries.lock().await;

        let value = match entries.get(key) {
            Some(entry) if entry.is_live(started) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        drop(entries);

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        self.record(started);
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StorageError> {
        let started = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, started);
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry(ttl),
            },
        );
        drop(entries);

        self.record(started);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let started = Instant::now();
        let removed = self
            .entries
            .lock()
            .await
            .remove(key)
            .is_some_and(|entry| entry.is_live(started));
        self.record(started);
        Ok(removed)
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        initial: i64,
        ttl: Duration,
    ) -> Result<i64, StorageError> {
        let started = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, started);

        let next = match entries.get_mut(key) {
            Some(entry) if entry.is_live(started) => {
                let current: i64 = entry.value.parse().map_err(|_| {
                    StorageError::cache(format!("Value at '{}' is not a counter", key))
                })?;
                let next = current.saturating_add(delta);
                entry.value = next.to_string();
                next
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: initial.to_string(),
                        expires_at: expiry(ttl),
                    },
                );
                initial
            }
        };
        drop(entries);

        self.record(started);
        Ok(next)
    }

    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        let started = Instant::now();
        let touched = match self.entries.lock().await.get_mut(key) {
            Some(entry) if entry.is_live(started) => {
                entry.expires_at = expiry(ttl);
                true
            }
            _ => false,
        };
        self.record(started);
        Ok(touched)
    }

    fn stats(&self) -> KeyStoreStats {
        KeyStoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            execution_time: Duration::from_nanos(self.execution_nanos.load(Ordering::Relaxed)),
        }
    }
}
