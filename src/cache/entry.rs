//! Cache entry and metadata types.
//!
//! An entry is self-describing: it carries its own key and metadata, so the
//! on-disk file alone is enough to rebuild the index after a crash.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CacheError;

/// Bookkeeping stored alongside every cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// When the entry was written
    pub created_at: DateTime<Utc>,
    /// Last time the entry was read and found valid
    pub last_accessed_at: DateTime<Utc>,
    /// Per-entry time-to-live; `None` defers to the strategy default
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    /// Size of the serialized value in bytes
    pub size_bytes: u64,
    /// Whether the file is zlib-compressed on disk
    #[serde(default)]
    pub compressed: bool,
}

/// A single cached value plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    /// Wrap a JSON value in a fresh entry.
    pub fn new(
        key: impl Into<String>,
        value: serde_json::Value,
        ttl_seconds: Option<u64>,
        compressed: bool,
        now: DateTime<Utc>,
    ) -> Result<Self, CacheError> {
        let size_bytes = serialized_size(&value)?;
        Ok(Self {
            key: key.into(),
            value,
            metadata: EntryMetadata {
                created_at: now,
                last_accessed_at: now,
                ttl_seconds,
                size_bytes,
                compressed,
            },
        })
    }

    /// Time since the entry was created.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        elapsed(self.metadata.created_at, now)
    }

    /// Time since the entry was last accessed.
    pub fn idle(&self, now: DateTime<Utc>) -> Duration {
        elapsed(self.metadata.last_accessed_at, now)
    }
}

/// Length of the compact JSON encoding of `value`.
pub fn serialized_size(value: &serde_json::Value) -> Result<u64, CacheError> {
    Ok(serde_json::to_vec(value)
        .map_err(CacheError::Serialization)?
        .len() as u64)
}

/// Non-negative wall-clock difference. A clock that moved backwards reads as zero.
pub(crate) fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
