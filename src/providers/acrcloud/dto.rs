//! ACRCloud identify API Data Transfer Objects
//!
//! These types match what `POST /v1/identify` returns.
//! Convert to [`MatchResult`] in `adapter.rs` only.
//!
//! API Reference: https://docs.acrcloud.com/reference/identification-api
//!
//! [`MatchResult`]: crate::providers::MatchResult

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentifyResponse {
    pub status: Status,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Status {
    pub code: i32,
    #[serde(default)]
    pub msg: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Metadata {
    #[serde(default)]
    pub music: Vec<Music>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Music {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artists: Vec<Named>,
    pub album: Option<Named>,
    pub release_date: Option<String>,
    /// 0-100
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub genres: Vec<Named>,
    pub external_ids: Option<ExternalIds>,
    pub acrid: Option<String>,
}

/// Artists, albums and genres all come as `{"name": ...}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Named {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExternalIds {
    pub isrc: Option<String>,
    pub upc: Option<String>,
}

// ============================================================================
// CONTRACT TESTS
// ============================================================================

#[cfg(test)]
mod contract_tests {
    use super::*;

    #[test]
    fn test_parse_no_result() {
        let json = r#"{"status": {"msg": "No result", "code": 1001, "version": "1.0"}}"#;
        let response: IdentifyResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.status.code, 1001);
        assert!(response.metadata.is_none());
    }

    #[test]
    fn test_parse_music_result() {
        let json = r#"{
            "status": {"msg": "Success", "code": 0, "version": "1.0"},
            "metadata": {
                "timestamp_utc": "2024-01-01 12:00:00",
                "music": [{
                    "title": "Strings of Life",
                    "artists": [{"name": "Rhythim Is Rhythim"}],
                    "album": {"name": "Strings of Life"},
                    "release_date": "1987-01-01",
                    "score": 100,
                    "genres": [{"name": "Electronic"}],
                    "external_ids": {"isrc": "USX9P8700001", "upc": "123"},
                    "acrid": "6049f11da7095e8bb8266871d4a70873",
                    "duration_ms": 420000
                }]
            }
        }"#;

        let response: IdentifyResponse = serde_json::from_str(json).unwrap();
        let music = &response.metadata.unwrap().music[0];
        assert_eq!(music.title, "Strings of Life");
        assert_eq!(music.artists[0].name, "Rhythim Is Rhythim");
        assert_eq!(music.album.as_ref().unwrap().name, "Strings of Life");
        assert!((music.score - 100.0).abs() < f64::EPSILON);
        assert_eq!(music.external_ids.as_ref().unwrap().isrc.as_deref(), Some("USX9P8700001"));
    }

    #[test]
    fn test_parse_sparse_music_entry() {
        let json = r#"{"status": {"code": 0}, "metadata": {"music": [{"title": "X"}]}}"#;
        let response: IdentifyResponse = serde_json::from_str(json).unwrap();
        let music = &response.metadata.unwrap().music[0];
        assert!(music.artists.is_empty());
        assert!(music.external_ids.is_none());
        assert_eq!(music.score, 0.0);
    }
}
