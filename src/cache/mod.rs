//! Persistent cache for recognition results.
//!
//! The engine layers three things over a [`CacheStorage`] backend:
//! - validity decisions through an [`InvalidationStrategy`]
//! - per-key async locks so writes to the same key never interleave
//! - hit/miss/invalidation statistics
//!
//! Values are stored as JSON, so anything `Serialize + DeserializeOwned`
//! can be cached.

mod entry;
mod index;
mod invalidation;
mod storage;

pub use entry::{CacheEntry, EntryMetadata};
pub use index::{CacheIndex, IndexRecord, IntegrityReport, INDEX_FILE};
pub use invalidation::{
    CompositeStrategy, InvalidationStrategy, LruStrategy, SizeStrategy, TtlStrategy,
};
pub use storage::{filename_for, CacheStorage, FileStorage, StorageStats};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the cache engine and its storage.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache key must not be empty")]
    InvalidKey,

    #[error("Value is not representable as JSON: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Cache section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disable to run every segment against the providers
    pub enabled: bool,
    /// Cache directory; `None` uses the OS cache dir
    pub dir: Option<PathBuf>,
    /// Default time-to-live in seconds (also the LRU idle window)
    pub ttl_seconds: u64,
    /// Largest serialized value served from the cache
    pub max_size_bytes: u64,
    /// Age threshold for `cache cleanup`
    pub max_age_seconds: u64,
    /// Zlib-compress entry files
    pub compression: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            ttl_seconds: 3600,
            max_size_bytes: 1_000_000,
            max_age_seconds: 86_400,
            compression: true,
        }
    }
}

impl CacheConfig {
    /// Resolved cache directory.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_cache_dir)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }
}

/// `<os cache dir>/tracklister`, falling back to the working directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tracklister")
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub entries: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    entries: AtomicU64,
}

/// Table of per-key async locks.
///
/// The table itself sits behind a short synchronous lock; the per-key locks
/// are held across await points.
#[derive(Debug, Default)]
struct KeyLocks {
    table: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    async fn lock(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.table.lock();
            table.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop locks nobody is holding or waiting on.
    fn prune(&self) {
        self.table.lock().retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    fn remove(&self, key: &str) {
        let mut table = self.table.lock();
        if table.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            table.remove(key);
        }
    }
}

/// Cache engine.
pub struct Cache {
    storage: Box<dyn CacheStorage>,
    strategy: Box<dyn InvalidationStrategy>,
    locks: KeyLocks,
    counters: Counters,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("strategy", &self.strategy)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl Cache {
    /// Wrap a storage backend. `entries` starts at the backend's current size.
    pub async fn new(
        storage: Box<dyn CacheStorage>,
        strategy: Box<dyn InvalidationStrategy>,
    ) -> Self {
        let counters = Counters::default();
        counters
            .entries
            .store(storage.len().await as u64, Ordering::Relaxed);
        Self {
            storage,
            strategy,
            locks: KeyLocks::default(),
            counters,
        }
    }

    /// File-backed cache in `dir`.
    pub async fn open(
        dir: impl Into<PathBuf>,
        strategy: Box<dyn InvalidationStrategy>,
    ) -> Result<Self, CacheError> {
        let storage = FileStorage::open(dir).await?;
        Ok(Self::new(Box::new(storage), strategy).await)
    }

    /// File-backed cache with the standard TTL + LRU + size strategy.
    pub async fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let strategy =
            CompositeStrategy::standard(Some(config.ttl()), Some(config.max_size_bytes));
        Self::open(config.resolved_dir(), Box::new(strategy)).await
    }

    /// Look up `key`. Expired entries are deleted and reported as a miss.
    ///
    /// A stored value that does not deserialize into `V` counts as an
    /// invalidation.
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, CacheError> {
        validate_key(key)?;
        let _guard = self.locks.lock(key).await;

        let Some(entry) = self.storage.get(key).await? else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Cache miss: {}", key);
            return Ok(None);
        };

        let now = Utc::now();
        if !self.strategy.is_valid(&entry, now) {
            tracing::debug!("Cache entry expired: {}", key);
            self.invalidate(key).await;
            return Ok(None);
        }

        let updated = self.strategy.update_metadata(&entry, now);
        let value = match serde_json::from_value::<V>(updated.value.clone()) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Cached value for {} has unexpected shape: {}", key, e);
                self.invalidate(key).await;
                return Ok(None);
            }
        };

        if updated.metadata != entry.metadata
            && let Err(e) = self.storage.set(&updated).await
        {
            tracing::warn!("Failed to persist access metadata for {}: {}", key, e);
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Cache hit: {}", key);
        Ok(Some(value))
    }

    async fn invalidate(&self, key: &str) {
        match self.storage.delete(key).await {
            Ok(true) => {
                self.decrement_entries();
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to delete invalid cache entry {}: {}", key, e),
        }
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn decrement_entries(&self) {
        let _ = self
            .counters
            .entries
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    /// Store `value` under `key`.
    pub async fn set<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl_seconds: Option<u64>,
        compress: bool,
    ) -> Result<(), CacheError> {
        validate_key(key)?;
        let value = serde_json::to_value(value).map_err(CacheError::Serialization)?;
        let entry = CacheEntry::new(key, value, ttl_seconds, compress, Utc::now())?;

        let _guard = self.locks.lock(key).await;
        if self.storage.set(&entry).await? {
            self.counters.entries.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!("Cached {} ({} bytes)", key, entry.metadata.size_bytes);
        Ok(())
    }

    /// Remove `key`. Returns true if it existed.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        validate_key(key)?;
        let removed = {
            let _guard = self.locks.lock(key).await;
            self.storage.delete(key).await?
        };
        self.locks.remove(key);
        if removed {
            self.decrement_entries();
        }
        Ok(removed)
    }

    /// Remove every entry and reset the statistics.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        let removed = self.storage.clear().await?;
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        self.counters.invalidations.store(0, Ordering::Relaxed);
        self.counters.entries.store(0, Ordering::Relaxed);
        self.locks.prune();
        Ok(removed)
    }

    /// Remove entries idle for longer than `max_age` and reconcile the
    /// index with the files on disk. Returns the number of entries removed.
    pub async fn cleanup(&self, max_age: Duration) -> Result<usize, CacheError> {
        let removed = self.storage.cleanup(max_age).await?;
        self.counters
            .entries
            .store(self.storage.len().await as u64, Ordering::Relaxed);
        self.locks.prune();
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            entries: self.counters.entries.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    pub async fn storage_stats(&self) -> StorageStats {
        self.storage.stats().await
    }

    /// Write out anything the storage backend is holding back.
    pub async fn flush(&self) -> Result<(), CacheError> {
        self.storage.flush().await
    }
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey);
    }
    Ok(())
}
