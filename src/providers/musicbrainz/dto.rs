//! MusicBrainz API Data Transfer Objects
//!
//! Shapes of the `/recording/{mbid}?inc=artists+releases+isrcs+genres`
//! response. Convert to [`RecordingDetails`] in `adapter.rs`.
//!
//! API Reference: https://musicbrainz.org/doc/MusicBrainz_API
//!
//! [`RecordingDetails`]: super::RecordingDetails

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecordingResponse {
    pub id: String,
    pub title: String,
    /// Milliseconds
    pub length: Option<u64>,
    pub first_release_date: Option<String>,
    #[serde(default)]
    pub artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    pub releases: Vec<Release>,
    #[serde(default)]
    pub isrcs: Vec<String>,
    #[serde(default)]
    pub genres: Vec<Genre>,
}

/// Artist credit (several for collaborations)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtistCredit {
    pub artist: Artist,
    /// Credited name, may differ from the official one
    pub name: Option<String>,
    /// e.g. " & ", " feat. "
    pub joinphrase: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub sort_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Release {
    pub id: String,
    pub title: String,
    /// Official, Bootleg, ...
    pub status: Option<String>,
    /// YYYY, YYYY-MM or YYYY-MM-DD
    pub date: Option<String>,
    pub release_group: Option<ReleaseGroup>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReleaseGroup {
    pub id: String,
    pub title: String,
    pub primary_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Genre {
    pub name: String,
    #[serde(default)]
    pub count: u32,
}

/// Error body returned with non-2xx statuses
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    pub error: String,
}

// ============================================================================
// CONTRACT TESTS
// ============================================================================
