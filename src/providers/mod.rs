//! Recognition providers.
//!
//! Every backend sits behind [`RecognitionProvider`], so the identification
//! pipeline never knows which service answered. "No match" is `Ok(None)`;
//! errors are reserved for transport, auth, quota, parsing and timeouts.
//!
//! Each HTTP backend follows the same layout:
//! - `dto.rs` mirrors the wire format exactly
//! - `adapter.rs` is the only place DTOs become [`MatchResult`]s
//! - `client.rs` does the HTTP
//! - `mod.rs` implements [`RecognitionProvider`]

pub mod acoustid;
pub mod acrcloud;
pub mod fingerprint;
pub mod musicbrainz;
mod registry;
pub mod traits;

#[cfg(test)]
pub mod mocks;

pub use registry::{ProviderKind, ProviderRegistry};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::segment::AudioSegment;

/// Errors a provider can return.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("API request failed: {0}")]
    Api(String),

    #[error("Failed to generate fingerprint: {0}")]
    Fingerprint(String),

    #[error("Failed to read audio: {0}")]
    Io(String),

    #[error("Provider {0} is closed")]
    Closed(String),
}

impl ProviderError {
    /// Worth retrying later or on another provider.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Network(_) | ProviderError::Timeout(_)
        )
    }
}

/// A provider's answer for one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub title: String,
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    /// 0-100
    pub confidence: f64,
    /// Name of the provider that produced the match
    pub provider: String,
    #[serde(default)]
    pub recording_id: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
}

impl MatchResult {
    pub fn new(
        title: impl Into<String>,
        artists: Vec<String>,
        confidence: f64,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            artists,
            album: None,
            release_date: None,
            confidence,
            provider: provider.into(),
            recording_id: None,
            isrc: None,
            genres: Vec::new(),
        }
    }

    /// Artists joined for display, e.g. `"A, B"`.
    pub fn artist_string(&self) -> String {
        self.artists.join(", ")
    }
}

/// A music recognition backend.
#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    /// Stable name used for cache keys, rate limits and logs.
    fn name(&self) -> &str;

    /// Identify the song playing in `segment`.
    async fn identify(&self, segment: &AudioSegment) -> Result<Option<MatchResult>, ProviderError>;

    /// Add metadata to a match. Pass-through unless the backend can do better.
    async fn enrich(&self, candidate: MatchResult) -> Result<MatchResult, ProviderError> {
        Ok(candidate)
    }

    /// Release resources. Safe to call more than once.
    async fn close(&self) {}
}

/// Provider section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Provider tried first for every segment
    pub primary: String,
    /// Try `fallback` providers when the primary is denied or fails
    pub fallback_enabled: bool,
    pub fallback: Vec<String>,
    /// Per-call timeout in seconds
    pub request_timeout_secs: f64,
    /// Look up MusicBrainz details for AcoustID matches
    pub musicbrainz_enrichment: bool,
    /// ACRCloud region host
    pub acrcloud_host: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary: "acoustid".to_string(),
            fallback_enabled: false,
            fallback: Vec::new(),
            request_timeout_secs: 10.0,
            musicbrainz_enrichment: true,
            acrcloud_host: acrcloud::DEFAULT_HOST.to_string(),
        }
    }
}

impl ProvidersConfig {
    pub fn request_timeout(&self) -> Duration {
        crate::config::secs_to_duration(self.request_timeout_secs)
    }

    /// Primary followed by fallbacks (if enabled), without repeats.
    pub fn provider_order(&self) -> Vec<String> {
        let mut order = vec![self.primary.clone()];
        if self.fallback_enabled {
            for name in &self.fallback {
                if !order.contains(name) {
                    order.push(name.clone());
                }
            }
        }
        order
    }
}

/// Build the shared HTTP client for a provider.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .gzip(true)
        .timeout(timeout)
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .build()
        .map_err(|e| ProviderError::Network(format!("Failed to build HTTP client: {e}")))
}
