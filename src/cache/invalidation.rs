//! Cache invalidation strategies.
//!
//! A strategy answers two questions about a stored entry: is it still valid,
//! and what should its metadata look like after a valid access. Strategies
//! never mutate the entry they are given; `update_metadata` returns a copy
//! that the cache persists after the validity decision has been made.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::entry::{serialized_size, CacheEntry};

/// Decides whether a cached entry may still be served.
pub trait InvalidationStrategy: Send + Sync + fmt::Debug {
    /// Short name used in log output.
    fn name(&self) -> &'static str;

    /// Whether `entry` may be served at `now`.
    fn is_valid(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool;

    /// Whether `entry` should be dropped at `now`.
    fn should_invalidate(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        !self.is_valid(entry, now)
    }

    /// Metadata after a valid access. Pass-through by default.
    fn update_metadata(&self, entry: &CacheEntry, _now: DateTime<Utc>) -> CacheEntry {
        entry.clone()
    }
}

/// Time-to-live measured from entry creation.
///
/// The entry's own `ttl_seconds` wins over the strategy default; with
/// neither set the entry never expires.
#[derive(Debug, Clone, Default)]
pub struct TtlStrategy {
    default_ttl: Option<Duration>,
}

impl TtlStrategy {
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self { default_ttl }
    }

    fn ttl_for(&self, entry: &CacheEntry) -> Option<Duration> {
        entry
            .metadata
            .ttl_seconds
            .map(Duration::from_secs)
            .or(self.default_ttl)
    }
}

impl InvalidationStrategy for TtlStrategy {
    fn name(&self) -> &'static str {
        "ttl"
    }

    fn is_valid(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match self.ttl_for(entry) {
            Some(ttl) => entry.age(now) < ttl,
            None => true,
        }
    }
}

/// Least-recently-used window: entries idle for longer than `max_age` expire.
#[derive(Debug, Clone, Default)]
pub struct LruStrategy {
    max_age: Option<Duration>,
}

impl LruStrategy {
    pub fn new(max_age: Option<Duration>) -> Self {
        Self { max_age }
    }
}

impl InvalidationStrategy for LruStrategy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn is_valid(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match self.max_age {
            Some(max_age) => entry.idle(now) < max_age,
            None => true,
        }
    }

    fn update_metadata(&self, entry: &CacheEntry, now: DateTime<Utc>) -> CacheEntry {
        let mut updated = entry.clone();
        if self.is_valid(entry, now) {
            updated.metadata.last_accessed_at = now;
        }
        updated
    }
}

/// Rejects entries whose serialized value exceeds `max_size_bytes`.
#[derive(Debug, Clone, Default)]
pub struct SizeStrategy {
    max_size_bytes: Option<u64>,
}

impl SizeStrategy {
    pub fn new(max_size_bytes: Option<u64>) -> Self {
        Self { max_size_bytes }
    }
}

impl InvalidationStrategy for SizeStrategy {
    fn name(&self) -> &'static str {
        "size"
    }

    fn is_valid(&self, entry: &CacheEntry, _now: DateTime<Utc>) -> bool {
        match self.max_size_bytes {
            Some(max) => entry.metadata.size_bytes <= max,
            None => true,
        }
    }

    fn update_metadata(&self, entry: &CacheEntry, _now: DateTime<Utc>) -> CacheEntry {
        let mut updated = entry.clone();
        if let Ok(size) = serialized_size(&entry.value) {
            updated.metadata.size_bytes = size;
        }
        updated
    }
}

/// Ordered combination of strategies.
///
/// Valid only if every member says valid; should be invalidated if any
/// member says so. Metadata updates run in order, each seeing the previous
/// member's output.
#[derive(Debug, Default)]
pub struct CompositeStrategy {
    strategies: Vec<Box<dyn InvalidationStrategy>>,
}

impl CompositeStrategy {
    pub fn new(strategies: Vec<Box<dyn InvalidationStrategy>>) -> Self {
        Self { strategies }
    }

    /// TTL + LRU over the same window, capped by entry size.
    pub fn standard(ttl: Option<Duration>, max_size_bytes: Option<u64>) -> Self {
        Self::new(vec![
            Box::new(TtlStrategy::new(ttl)),
            Box::new(LruStrategy::new(ttl)),
            Box::new(SizeStrategy::new(max_size_bytes)),
        ])
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl InvalidationStrategy for CompositeStrategy {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn is_valid(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        for strategy in &self.strategies {
            if !strategy.is_valid(entry, now) {
                tracing::debug!(
                    "Cache entry {} rejected by {} strategy",
                    entry.key,
                    strategy.name()
                );
                return false;
            }
        }
        true
    }

    fn should_invalidate(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.strategies
            .iter()
            .any(|strategy| strategy.should_invalidate(entry, now))
    }

    fn update_metadata(&self, entry: &CacheEntry, now: DateTime<Utc>) -> CacheEntry {
        self.strategies
            .iter()
            .fold(entry.clone(), |current, strategy| {
                strategy.update_metadata(&current, now)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;

    fn entry_at(created: DateTime<Utc>, ttl: Option<u64>) -> CacheEntry {
        CacheEntry::new("key", json!({"title": "Song X"}), ttl, false, created).unwrap()
    }

    #[test]
    fn test_ttl_uses_entry_ttl_first() {
        let created = Utc::now();
        let strategy = TtlStrategy::new(Some(Duration::from_secs(3600)));
        let entry = entry_at(created, Some(1));

        assert!(strategy.is_valid(&entry, created + TimeDelta::milliseconds(500)));
        assert!(!strategy.is_valid(&entry, created + TimeDelta::milliseconds(1100)));
    }

    #[test]
    fn test_ttl_falls_back_to_default() {
        let created = Utc::now();
        let strategy = TtlStrategy::new(Some(Duration::from_secs(10)));
        let entry = entry_at(created, None);

        assert!(strategy.is_valid(&entry, created + TimeDelta::seconds(9)));
        assert!(strategy.should_invalidate(&entry, created + TimeDelta::seconds(10)));
    }

    #[test]
    fn test_ttl_unset_never_expires() {
        let created = Utc::now();
        let strategy = TtlStrategy::new(None);
        let entry = entry_at(created, None);
        assert!(strategy.is_valid(&entry, created + TimeDelta::days(365)));
    }

    #[test]
    fn test_lru_touches_valid_entries() {
        let created = Utc::now();
        let strategy = LruStrategy::new(Some(Duration::from_secs(60)));
        let entry = entry_at(created, None);
        let now = created + TimeDelta::seconds(30);

        let updated = strategy.update_metadata(&entry, now);

        assert_eq!(updated.metadata.last_accessed_at, now);
        // The input is never mutated
        assert_eq!(entry.metadata.last_accessed_at, created);
    }

    #[test]
    fn test_lru_expires_idle_entries() {
        let created = Utc::now();
        let strategy = LruStrategy::new(Some(Duration::from_secs(60)));
        let entry = entry_at(created, None);
        let later = created + TimeDelta::seconds(61);

        assert!(!strategy.is_valid(&entry, later));
        assert_eq!(
            strategy.update_metadata(&entry, later).metadata.last_accessed_at,
            created
        );
    }

    #[test]
    fn test_size_limit() {
        let now = Utc::now();
        let small = entry_at(now, None);
        let limit = small.metadata.size_bytes;

        assert!(SizeStrategy::new(Some(limit)).is_valid(&small, now));
        assert!(!SizeStrategy::new(Some(limit - 1)).is_valid(&small, now));
        assert!(SizeStrategy::new(None).is_valid(&small, now));
    }

    #[test]
    fn test_size_recomputes_on_update() {
        let now = Utc::now();
        let mut entry = entry_at(now, None);
        entry.metadata.size_bytes = 0;

        let updated = SizeStrategy::new(None).update_metadata(&entry, now);
        assert_eq!(updated.metadata.size_bytes, r#"{"title":"Song X"}"#.len() as u64);
    }

    #[test]
    fn test_composite_requires_all_valid() {
        let created = Utc::now();
        let composite = CompositeStrategy::standard(Some(Duration::from_secs(100)), Some(5));
        let entry = entry_at(created, None);

        // Entry is well inside the TTL but larger than 5 bytes
        assert!(!composite.is_valid(&entry, created));
        assert!(composite.should_invalidate(&entry, created));
    }

    #[test]
    fn test_composite_applies_updates_in_sequence() {
        let created = Utc::now();
        let composite = CompositeStrategy::standard(Some(Duration::from_secs(100)), None);
        let mut entry = entry_at(created, None);
        entry.metadata.size_bytes = 0;
        let now = created + TimeDelta::seconds(10);

        let updated = composite.update_metadata(&entry, now);

        assert_eq!(updated.metadata.last_accessed_at, now);
        assert!(updated.metadata.size_bytes > 0);
        assert_eq!(entry.metadata.size_bytes, 0);
    }

    #[test]
    fn test_empty_composite_is_always_valid() {
        let composite = CompositeStrategy::default();
        let entry = entry_at(Utc::now(), Some(0));
        assert!(composite.is_empty());
        assert!(composite.is_valid(&entry, Utc::now() + TimeDelta::days(1)));
    }
}
