//! Cache storage backends.
//!
//! `CacheStorage` is the seam between the cache engine and where bytes live.
//! `FileStorage` keeps one JSON file per key (optionally zlib-compressed)
//! plus an index file, and writes every file atomically: temp file in the
//! same directory, fsync, rename over the target.
//!
//! Index changes are written in batches. Entry files embed their key, so an
//! index that lags behind is caught up from the directory on the next open.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use super::entry::CacheEntry;
use super::index::{CacheIndex, IndexRecord};
use super::CacheError;

/// Extension of entry files.
pub const CACHE_EXTENSION: &str = "cache";
/// Extension of in-progress writes.
pub const TEMP_EXTENSION: &str = "tmp";

/// Unsaved index changes that force a write.
const INDEX_SAVE_BATCH: usize = 32;
/// Oldest an unsaved index change may get before the next change writes it.
const INDEX_SAVE_INTERVAL: Duration = Duration::from_secs(5);

/// Entry count and on-disk footprint of a storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StorageStats {
    pub entries: usize,
    pub total_bytes: u64,
}

/// Persistent key → entry store used by [`super::Cache`].
///
/// Implementations must be safe to call concurrently for different keys.
/// Concurrent writes to the same key are serialised by the cache engine.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Read an entry. Missing or unreadable entries are `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Write an entry. Returns true if the key was not stored before.
    async fn set(&self, entry: &CacheEntry) -> Result<bool, CacheError>;

    /// Remove an entry. Returns true if something was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove everything. Returns the number of entry files deleted.
    async fn clear(&self) -> Result<usize, CacheError>;

    /// Remove entries idle for longer than `max_age` and reconcile storage.
    /// Returns the number of entries removed.
    async fn cleanup(&self, max_age: Duration) -> Result<usize, CacheError>;

    /// Number of stored entries.
    async fn len(&self) -> usize;

    async fn stats(&self) -> StorageStats;

    /// Persist anything buffered. The default has nothing to do.
    async fn flush(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Stable file name for a key.
pub fn filename_for(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{hex}.{CACHE_EXTENSION}")
}

/// Serialise an entry, compressing when its metadata asks for it.
pub fn encode_entry(entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
    let json = serde_json::to_vec(entry).map_err(CacheError::Serialization)?;
    if !entry.metadata.compressed {
        return Ok(json);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .and_then(|_| encoder.finish())
        .map_err(|source| CacheError::Io {
            path: PathBuf::from(&entry.key),
            source,
        })
}

/// Decode an entry file. Plain JSON starts with `{`; anything else is inflated.
pub fn decode_entry(bytes: &[u8]) -> Result<CacheEntry, String> {
    if bytes.first() == Some(&b'{') {
        return serde_json::from_slice(bytes).map_err(|e| e.to_string());
    }

    let mut json = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| format!("zlib: {e}"))?;
    serde_json::from_slice(&json).map_err(|e| e.to_string())
}

/// One JSON file per key under a directory, plus `cache.index.json`.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    index: Mutex<CacheIndex>,
    /// Shared by single-entry writes, exclusive for whole-directory sweeps
    sweep: RwLock<()>,
    unsaved: AtomicUsize,
    last_saved: parking_lot::Mutex<Instant>,
    temp_counter: AtomicU64,
}

impl FileStorage {
    /// Open (creating if needed) a cache directory.
    ///
    /// A missing or corrupt index is rebuilt from the entry files and
    /// written back immediately.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| CacheError::Io {
                path: dir.clone(),
                source,
            })?;

        let (index, rebuilt) = CacheIndex::load(&dir).await;
        if rebuilt && let Err(e) = index.save().await {
            tracing::warn!("Failed to write rebuilt cache index: {}", e);
        }

        Ok(Self {
            dir,
            index: Mutex::new(index),
            sweep: RwLock::new(()),
            unsaved: AtomicUsize::new(0),
            last_saved: parking_lot::Mutex::new(Instant::now()),
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn temp_path(&self, filename: &str) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!("{filename}.{}.{n}.{TEMP_EXTENSION}", std::process::id()))
    }

    async fn write_atomic(&self, filename: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let target = self.dir.join(filename);
        let temp = self.temp_path(filename);

        let result = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp, &target).await
        }
        .await;

        if let Err(source) = result {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(CacheError::Io {
                path: target,
                source,
            });
        }
        Ok(())
    }

    async fn remove_file(path: &Path) -> Result<bool, CacheError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    async fn save_index(&self, index: &CacheIndex) -> Result<(), CacheError> {
        index.save().await.map_err(|source| CacheError::Io {
            path: self.dir.join(super::index::INDEX_FILE),
            source,
        })?;
        self.unsaved.store(0, Ordering::Relaxed);
        *self.last_saved.lock() = Instant::now();
        Ok(())
    }

    /// Note one index change, writing the index when a batch is full or the
    /// oldest unsaved change is getting stale. Call with the index locked.
    async fn index_changed(&self, index: &CacheIndex) -> Result<(), CacheError> {
        let unsaved = self.unsaved.fetch_add(1, Ordering::Relaxed) + 1;
        let stale = self.last_saved.lock().elapsed() >= INDEX_SAVE_INTERVAL;
        if unsaved >= INDEX_SAVE_BATCH || stale {
            self.save_index(index).await?;
        }
        Ok(())
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        if *self.unsaved.get_mut() == 0 {
            return;
        }
        if let Err(e) = self.index.get_mut().save_blocking() {
            tracing::warn!("Failed to write cache index on close: {}", e);
        }
    }
}

#[async_trait]
impl CacheStorage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let filename = match self.index.lock().await.get(key) {
            Some(record) => record.filename.clone(),
            None => return Ok(None),
        };
        let path = self.dir.join(&filename);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Cache file for {} vanished, dropping index record", key);
                let mut index = self.index.lock().await;
                if index.remove(key).is_some() {
                    self.index_changed(&index).await?;
                }
                return Ok(None);
            }
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        match decode_entry(&bytes) {
            Ok(entry) if entry.key == key => Ok(Some(entry)),
            Ok(entry) => {
                tracing::warn!(
                    "Cache file {} holds key {} instead of {}, ignoring",
                    path.display(),
                    entry.key,
                    key
                );
                Ok(None)
            }
            Err(message) => {
                tracing::warn!("Corrupt cache file {}: {}, removing", path.display(), message);
                let _writing = self.sweep.read().await;
                let mut index = self.index.lock().await;
                index.remove(key);
                Self::remove_file(&path).await?;
                self.index_changed(&index).await?;
                Ok(None)
            }
        }
    }

    async fn set(&self, entry: &CacheEntry) -> Result<bool, CacheError> {
        let bytes = encode_entry(entry)?;
        let filename = filename_for(&entry.key);
        // A sweep must not see the file before its index record exists
        let _writing = self.sweep.read().await;
        self.write_atomic(&filename, &bytes).await?;

        let mut index = self.index.lock().await;
        let is_new = index.insert(
            entry.key.clone(),
            IndexRecord {
                filename,
                created_at: entry.metadata.created_at,
                last_accessed_at: entry.metadata.last_accessed_at,
                size_bytes: bytes.len() as u64,
                ttl_seconds: entry.metadata.ttl_seconds,
                compressed: entry.metadata.compressed,
            },
        );
        self.index_changed(&index).await?;
        Ok(is_new)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let _writing = self.sweep.read().await;
        let mut index = self.index.lock().await;
        let Some(record) = index.remove(key) else {
            return Ok(false);
        };
        Self::remove_file(&self.dir.join(&record.filename)).await?;
        self.index_changed(&index).await?;
        Ok(true)
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let _sweeping = self.sweep.write().await;
        let mut index = self.index.lock().await;
        let mut removed = 0;

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|source| CacheError::Io {
                path: self.dir.clone(),
                source,
            })?;
        while let Ok(Some(dir_entry)) = entries.next_entry().await {
            let path = dir_entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(CACHE_EXTENSION) => {
                    if Self::remove_file(&path).await? {
                        removed += 1;
                    }
                }
                Some(TEMP_EXTENSION) => {
                    Self::remove_file(&path).await?;
                }
                _ => {}
            }
        }

        index.clear();
        self.save_index(&index).await?;
        tracing::info!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    async fn cleanup(&self, max_age: Duration) -> Result<usize, CacheError> {
        let _sweeping = self.sweep.write().await;
        let mut index = self.index.lock().await;
        let mut removed = 0;

        for key in index.expired_keys(max_age, Utc::now()) {
            if let Some(record) = index.remove(&key) {
                Self::remove_file(&self.dir.join(&record.filename)).await?;
                tracing::debug!("Removed expired cache entry {}", key);
                removed += 1;
            }
        }

        let report = index
            .verify_integrity()
            .await
            .map_err(|source| CacheError::Io {
                path: self.dir.clone(),
                source,
            })?;

        if report.is_clean() {
            tracing::debug!("Cache index matches {}", self.dir.display());
        }
        for key in &report.missing {
            index.remove(key);
            removed += 1;
        }
        for path in &report.orphaned {
            if Self::remove_file(path).await? {
                removed += 1;
            }
        }
        for path in &report.stale_temp {
            Self::remove_file(path).await?;
        }

        self.save_index(&index).await?;
        if removed > 0 {
            tracing::info!(
                "Cache cleanup removed {} entries ({} missing, {} orphaned)",
                removed,
                report.missing.len(),
                report.orphaned.len()
            );
        }
        Ok(removed)
    }

    async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    async fn stats(&self) -> StorageStats {
        let index = self.index.lock().await;
        StorageStats {
            entries: index.len(),
            total_bytes: index.total_size(),
        }
    }

    async fn flush(&self) -> Result<(), CacheError> {
        let index = self.index.lock().await;
        if self.unsaved.load(Ordering::Relaxed) > 0 {
            self.save_index(&index).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use serde_json::json;
    use tempfile::TempDir;

    fn entry(key: &str, compressed: bool) -> CacheEntry {
        CacheEntry::new(key, json!({"title": "Song X", "artist": "Artist A"}), None, compressed, Utc::now())
            .unwrap()
    }

    #[test]
    fn test_filename_is_stable_hash() {
        assert_eq!(filename_for("abc"), filename_for("abc"));
        assert_ne!(filename_for("abc"), filename_for("abd"));
        assert_eq!(filename_for("abc").len(), 64 + ".cache".len());
    }

    #[test]
    fn test_encode_detects_compression() {
        let plain = encode_entry(&entry("k", false)).unwrap();
        let packed = encode_entry(&entry("k", true)).unwrap();

        assert_eq!(plain[0], b'{');
        assert_ne!(packed[0], b'{');
        assert_eq!(decode_entry(&plain).unwrap().key, "k");
        assert_eq!(decode_entry(&packed).unwrap().key, "k");
        assert!(decode_entry(b"garbage").is_err());
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let e = entry("song", false);

        assert!(storage.set(&e).await.unwrap());
        assert!(!storage.set(&e).await.unwrap());
        assert_eq!(storage.get("song").await.unwrap(), Some(e));
        assert!(dir.path().join(filename_for("song")).exists());

        assert!(storage.delete("song").await.unwrap());
        assert!(!storage.delete("song").await.unwrap());
        assert_eq!(storage.get("song").await.unwrap(), None);
        assert!(!dir.path().join(filename_for("song")).exists());
    }

    #[tokio::test]
    async fn test_compressed_entries_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let e = entry("packed", true);

        storage.set(&e).await.unwrap();
        assert_eq!(storage.get("packed").await.unwrap(), Some(e));
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        for i in 0..5 {
            storage.set(&entry(&format!("k{i}"), i % 2 == 0)).await.unwrap();
        }

        let temps = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(TEMP_EXTENSION))
            .count();
        assert_eq!(temps, 0);
    }

    #[tokio::test]
    async fn test_index_rebuilt_after_crash() {
        let dir = TempDir::new().unwrap();
        {
            let storage = FileStorage::open(dir.path()).await.unwrap();
            storage.set(&entry("one", false)).await.unwrap();
            storage.set(&entry("two", true)).await.unwrap();
        }
        std::fs::remove_file(dir.path().join(super::super::index::INDEX_FILE)).unwrap();

        let storage = FileStorage::open(dir.path()).await.unwrap();
        assert_eq!(storage.len().await, 2);
        assert!(storage.get("one").await.unwrap().is_some());
        assert!(storage.get("two").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        storage.set(&entry("bad", false)).await.unwrap();
        std::fs::write(dir.path().join(filename_for("bad")), b"\x00\x01not zlib").unwrap();

        assert_eq!(storage.get("bad").await.unwrap(), None);
        assert_eq!(storage.len().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_reconciles_disk() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        storage.set(&entry("kept", false)).await.unwrap();
        storage.set(&entry("lost", false)).await.unwrap();

        std::fs::remove_file(dir.path().join(filename_for("lost"))).unwrap();
        std::fs::write(dir.path().join("stray.cache"), b"{}").unwrap();
        std::fs::write(dir.path().join("interrupted.tmp"), b"{").unwrap();

        let removed = storage.cleanup(Duration::from_secs(3600)).await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(storage.len().await, 1);
        assert!(!dir.path().join("stray.cache").exists());
        assert!(!dir.path().join("interrupted.tmp").exists());
        assert!(storage.get("kept").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_removes_idle_entries() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let mut old = entry("old", false);
        old.metadata.last_accessed_at = Utc::now() - chrono::TimeDelta::hours(2);
        storage.set(&old).await.unwrap();
        storage.set(&entry("fresh", false)).await.unwrap();

        let removed = storage.cleanup(Duration::from_secs(3600)).await.unwrap();

        assert_eq!(removed, 1);
        assert!(storage.get("old").await.unwrap().is_none());
        assert!(storage.get("fresh").await.unwrap().is_some());
    }

    fn indexed_keys(dir: &Path) -> Vec<String> {
        let bytes = std::fs::read(dir.join(super::super::index::INDEX_FILE)).unwrap();
        let records: HashMap<String, serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
        let mut keys: Vec<_> = records.into_keys().collect();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_flush_writes_batched_index() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        storage.set(&entry("a", false)).await.unwrap();
        storage.set(&entry("b", false)).await.unwrap();
        assert!(indexed_keys(dir.path()).is_empty());

        storage.flush().await.unwrap();
        assert_eq!(indexed_keys(dir.path()), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_index_saved_on_drop() {
        let dir = TempDir::new().unwrap();
        {
            let storage = FileStorage::open(dir.path()).await.unwrap();
            storage.set(&entry("kept", false)).await.unwrap();
        }
        assert_eq!(indexed_keys(dir.path()), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_unsaved_entries_survive_crash() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        storage.set(&entry("one", false)).await.unwrap();
        storage.set(&entry("two", true)).await.unwrap();
        // Skip the save on drop
        std::mem::forget(storage);

        let storage = FileStorage::open(dir.path()).await.unwrap();
        assert_eq!(storage.len().await, 2);
        assert!(storage.get("one").await.unwrap().is_some());
        assert!(storage.get("two").await.unwrap().is_some());
        assert_eq!(indexed_keys(dir.path()), vec!["one", "two"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cleanup_never_eats_concurrent_set() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());

        for i in 0..50 {
            let key = format!("key{i}");
            let writer = {
                let storage = Arc::clone(&storage);
                let e = entry(&key, i % 2 == 0);
                tokio::spawn(async move { storage.set(&e).await })
            };
            let sweeper = {
                let storage = Arc::clone(&storage);
                tokio::spawn(async move { storage.cleanup(Duration::from_secs(3600)).await })
            };
            let (written, swept) = tokio::join!(writer, sweeper);

            assert!(written.unwrap().is_ok(), "set {key} failed");
            swept.unwrap().unwrap();
            assert!(storage.get(&key).await.unwrap().is_some(), "{key} lost");
        }
        assert_eq!(storage.len().await, 50);
    }

    #[tokio::test]
    async fn test_clear_and_stats() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        storage.set(&entry("a", false)).await.unwrap();
        storage.set(&entry("b", false)).await.unwrap();

        let stats = storage.stats().await;
        assert_eq!(stats.entries, 2);
        assert!(stats.total_bytes > 0);

        assert_eq!(storage.clear().await.unwrap(), 2);
        assert_eq!(storage.stats().await, StorageStats::default());
    }
}
