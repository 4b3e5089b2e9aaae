//! On-disk index of cache entries.
//!
//! The index is a denormalised projection of the `.cache` files in the cache
//! directory. It is rebuilt from those files whenever it is missing or cannot
//! be parsed, so losing it never loses cached data.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use super::entry::elapsed;
use super::storage::{decode_entry, CACHE_EXTENSION, TEMP_EXTENSION};

/// Name of the index file inside the cache directory.
pub const INDEX_FILE: &str = "cache.index.json";

/// Index record for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Bytes on disk, after compression
    pub size_bytes: u64,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub compressed: bool,
}

/// Disagreements between the index and the directory contents.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IntegrityReport {
    /// Keys whose file no longer exists
    pub missing: Vec<String>,
    /// `.cache` files no key points at
    pub orphaned: Vec<PathBuf>,
    /// Leftover temp files from interrupted writes
    pub stale_temp: Vec<PathBuf>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.orphaned.is_empty() && self.stale_temp.is_empty()
    }
}

#[derive(Debug)]
pub struct CacheIndex {
    dir: PathBuf,
    records: HashMap<String, IndexRecord>,
}

impl CacheIndex {
    /// Load the index for `dir`, rebuilding it from the entry files if the
    /// index file is missing or corrupt, and adopting entry files it does not
    /// list. Returns the index and whether it differs from the file on disk.
    pub async fn load(dir: &Path) -> (Self, bool) {
        let path = dir.join(INDEX_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, IndexRecord>>(&bytes) {
                Ok(mut records) => {
                    tracing::debug!("Loaded cache index with {} entries", records.len());
                    // Entries written after the last index save
                    let adopted = Self::adopt_unindexed(dir, &mut records).await;
                    if adopted > 0 {
                        tracing::info!("Adopted {} cache entries missing from the index", adopted);
                    }
                    return (
                        Self {
                            dir: dir.to_path_buf(),
                            records,
                        },
                        adopted > 0,
                    );
                }
                Err(e) => {
                    tracing::warn!("Cache index {} is corrupt ({}), rebuilding", path.display(), e);
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No cache index at {}, rebuilding", path.display());
            }
            Err(e) => {
                tracing::warn!("Failed to read cache index {}: {}, rebuilding", path.display(), e);
            }
        }

        let records = Self::scan(dir).await;
        tracing::info!("Rebuilt cache index with {} entries", records.len());
        (
            Self {
                dir: dir.to_path_buf(),
                records,
            },
            true,
        )
    }

    /// Rebuild records by reading every `.cache` file in `dir`.
    async fn scan(dir: &Path) -> HashMap<String, IndexRecord> {
        let mut records = HashMap::new();
        Self::adopt_unindexed(dir, &mut records).await;
        records
    }

    /// Add a record for every decodable `.cache` file no record points at.
    /// Returns how many were added.
    async fn adopt_unindexed(dir: &Path, records: &mut HashMap<String, IndexRecord>) -> usize {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot scan cache directory {}: {}", dir.display(), e);
                return 0;
            }
        };
        let known: HashSet<String> = records.values().map(|r| r.filename.clone()).collect();
        let mut adopted = 0;

        while let Ok(Some(dir_entry)) = entries.next_entry().await {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CACHE_EXTENSION) {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            if known.contains(&filename) {
                continue;
            }
            if let Some((key, record)) = Self::read_record(&path, filename).await {
                records.insert(key, record);
                adopted += 1;
            }
        }
        adopted
    }

    async fn read_record(path: &Path, filename: String) -> Option<(String, IndexRecord)> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Skipping unreadable cache file {}: {}", path.display(), e);
                return None;
            }
        };
        match decode_entry(&bytes) {
            Ok(entry) => Some((
                entry.key,
                IndexRecord {
                    filename,
                    created_at: entry.metadata.created_at,
                    last_accessed_at: entry.metadata.last_accessed_at,
                    size_bytes: bytes.len() as u64,
                    ttl_seconds: entry.metadata.ttl_seconds,
                    compressed: entry.metadata.compressed,
                },
            )),
            Err(e) => {
                tracing::warn!("Skipping corrupt cache file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{INDEX_FILE}.{TEMP_EXTENSION}"))
    }

    /// Persist the index atomically (temp file + rename).
    pub async fn save(&self) -> io::Result<()> {
        let temp = self.temp_path();
        let bytes = serde_json::to_vec(&self.records).map_err(io::Error::other)?;

        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, self.dir.join(INDEX_FILE)).await
    }

    /// [`CacheIndex::save`] for contexts that cannot await, such as `Drop`.
    pub fn save_blocking(&self) -> io::Result<()> {
        let temp = self.temp_path();
        let bytes = serde_json::to_vec(&self.records).map_err(io::Error::other)?;

        let mut file = std::fs::File::create(&temp)?;
        std::io::Write::write_all(&mut file, &bytes)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&temp, self.dir.join(INDEX_FILE))
    }

    pub fn get(&self, key: &str) -> Option<&IndexRecord> {
        self.records.get(key)
    }

    /// Insert or replace a record. Returns true if the key was new.
    pub fn insert(&mut self, key: String, record: IndexRecord) -> bool {
        self.records.insert(key, record).is_none()
    }

    pub fn remove(&mut self, key: &str) -> Option<IndexRecord> {
        self.records.remove(key)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total bytes on disk across all indexed entries.
    pub fn total_size(&self) -> u64 {
        self.records.values().map(|r| r.size_bytes).sum()
    }

    /// Keys whose last access is older than `max_age`.
    pub fn expired_keys(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, record)| elapsed(record.last_accessed_at, now) > max_age)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Compare the index against the directory contents.
    pub async fn verify_integrity(&self) -> io::Result<IntegrityReport> {
        let mut report = IntegrityReport::default();
        let mut on_disk = HashSet::new();

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(dir_entry) = entries.next_entry().await? {
            let path = dir_entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            match path.extension().and_then(|e| e.to_str()) {
                Some(ext) if ext == CACHE_EXTENSION => {
                    on_disk.insert(name);
                }
                Some(ext) if ext == TEMP_EXTENSION => report.stale_temp.push(path),
                _ => {}
            }
        }

        let referenced: HashSet<&str> =
            self.records.values().map(|r| r.filename.as_str()).collect();

        for (key, record) in &self.records {
            if !on_disk.contains(&record.filename) {
                report.missing.push(key.clone());
            }
        }
        for name in &on_disk {
            if !referenced.contains(name.as_str()) {
                report.orphaned.push(self.dir.join(name));
            }
        }

        Ok(report)
    }
}
