//! Test utilities and fixtures for tracklister tests.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{temp_cache, write_segment_files};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (cache, dir) = temp_cache().await;
//!     let segments = write_segment_files(dir.path(), &[0, 60]);
//!     // ... test logic
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use crate::cache::{Cache, CacheConfig};
use crate::matcher::Track;
use crate::segment::AudioSegment;

/// File-backed cache with default strategies in a fresh temporary directory.
///
/// Keep the `TempDir` alive for the duration of the test; the cache lives in
/// its `cache` subdirectory so the rest is free for fixtures.
pub async fn temp_cache() -> (Cache, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config = CacheConfig {
        dir: Some(dir.path().join("cache")),
        ..Default::default()
    };
    let cache = Cache::from_config(&config)
        .await
        .expect("Failed to open test cache");
    (cache, dir)
}

/// One 60-second segment file per start time, each with distinct contents.
pub fn write_segment_files(dir: &Path, starts: &[u64]) -> Vec<AudioSegment> {
    starts
        .iter()
        .map(|&start| {
            let path = dir.join(format!("segment_{start}.mp3"));
            std::fs::write(&path, format!("audio for {start}").repeat(100))
                .expect("Failed to write segment fixture");
            AudioSegment::new(path, Duration::from_secs(start), Duration::from_secs(60))
        })
        .collect()
}

/// A valid track at `secs` into the mix.
pub fn track(title: &str, artist: &str, secs: u64, confidence: f64) -> Track {
    Track::new(title, artist, Duration::from_secs(secs), confidence).expect("valid test track")
}
