//! AcoustID API Data Transfer Objects
//!
//! These types match what the AcoustID lookup endpoint returns with
//! `meta=recordings+releasegroups+compress`. Convert to [`MatchResult`] in
//! `adapter.rs`; nothing outside this module should see them.
//!
//! API Reference: https://acoustid.org/webservice#lookup
//!
//! [`MatchResult`]: crate::providers::MatchResult

use serde::{Deserialize, Serialize};

/// Top-level lookup response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LookupResponse {
    pub status: String,
    #[serde(default)]
    pub results: Vec<LookupResult>,
    /// Set when status != "ok"
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    pub code: i32,
    pub message: String,
}

/// A single fingerprint match
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LookupResult {
    pub id: String,
    /// Match confidence (0.0 to 1.0)
    pub score: f32,
    #[serde(default)]
    pub recordings: Vec<Recording>,
}

/// MusicBrainz recording attached to a match
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Recording {
    pub id: String,
    pub title: Option<String>,
    /// Seconds, as a float
    pub duration: Option<f64>,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub releasegroups: Vec<ReleaseGroup>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    /// Join phrase before the next artist (e.g. " feat. ")
    pub joinphrase: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReleaseGroup {
    pub id: String,
    pub title: Option<String>,
    /// Album, Single, EP, ...
    #[serde(rename = "type")]
    pub release_type: Option<String>,
}

// ============================================================================
// CONTRACT TESTS
// If these fail, the API response shape changed.
// ============================================================================
