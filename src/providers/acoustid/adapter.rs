//! Adapter layer: AcoustID DTOs to [`MatchResult`]s.
//!
//! The only place AcoustID response types are converted.

use super::dto;
use super::PROVIDER_NAME;
use crate::providers::{MatchResult, ProviderError};

/// AcoustID error codes worth distinguishing.
const INVALID_API_KEY: i32 = 4;
const INVALID_USER_API_KEY: i32 = 6;
const TOO_MANY_REQUESTS: i32 = 14;

/// Convert a lookup response into candidate matches.
///
/// Recordings without a title or artist are skipped; they cannot become
/// tracks.
pub fn to_match_results(response: dto::LookupResponse) -> Result<Vec<MatchResult>, ProviderError> {
    if response.status != "ok" {
        let error = response.error.unwrap_or(dto::ApiError {
            code: -1,
            message: "Unknown error".to_string(),
        });
        return Err(match error.code {
            INVALID_API_KEY | INVALID_USER_API_KEY => ProviderError::Authentication(error.message),
            TOO_MANY_REQUESTS => ProviderError::RateLimited(error.message),
            _ => ProviderError::Api(error.message),
        });
    }

    Ok(response
        .results
        .into_iter()
        .flat_map(|result| {
            let score = result.score;
            result
                .recordings
                .into_iter()
                .filter_map(move |recording| convert_recording(recording, score))
        })
        .collect())
}

fn convert_recording(recording: dto::Recording, score: f32) -> Option<MatchResult> {
    let title = recording.title.filter(|t| !t.trim().is_empty())?;
    let artists: Vec<String> = recording
        .artists
        .into_iter()
        .map(|a| a.name)
        .filter(|name| !name.trim().is_empty())
        .collect();
    if artists.is_empty() {
        return None;
    }

    // Prefer an album over singles and compilations
    let album = recording
        .releasegroups
        .iter()
        .find(|rg| rg.release_type.as_deref() == Some("Album"))
        .or_else(|| recording.releasegroups.first())
        .and_then(|rg| rg.title.clone());

    let mut result = MatchResult::new(
        title,
        artists,
        (f64::from(score) * 100.0).clamp(0.0, 100.0),
        PROVIDER_NAME,
    );
    result.album = album;
    result.recording_id = Some(recording.id);
    Some(result)
}

/// Highest-confidence candidate; the earliest wins a tie.
pub fn best_match(candidates: Vec<MatchResult>) -> Option<MatchResult> {
    candidates.into_iter().reduce(|best, candidate| {
        if candidate.confidence > best.confidence {
            candidate
        } else {
            best
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(id: &str, title: Option<&str>, artist: Option<&str>) -> dto::Recording {
        dto::Recording {
            id: id.to_string(),
            title: title.map(String::from),
            duration: None,
            artists: artist
                .map(|name| {
                    vec![dto::Artist {
                        id: "artist-id".into(),
                        name: name.into(),
                        joinphrase: None,
                    }]
                })
                .unwrap_or_default(),
            releasegroups: vec![],
        }
    }

    fn response(results: Vec<dto::LookupResult>) -> dto::LookupResponse {
        dto::LookupResponse {
            status: "ok".into(),
            results,
            error: None,
        }
    }

    #[test]
    fn test_convert_successful_response() {
        let matches = to_match_results(response(vec![dto::LookupResult {
            id: "aid-1".into(),
            score: 0.9,
            recordings: vec![recording("mbid-1", Some("Song X"), Some("Artist A"))],
        }]))
        .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].title, "Song X");
        assert_eq!(matches[0].artists, vec!["Artist A".to_string()]);
        assert!((matches[0].confidence - 90.0).abs() < 0.01);
        assert_eq!(matches[0].provider, "acoustid");
        assert_eq!(matches[0].recording_id.as_deref(), Some("mbid-1"));
    }

    #[test]
    fn test_incomplete_recordings_skipped() {
        let matches = to_match_results(response(vec![dto::LookupResult {
            id: "aid-1".into(),
            score: 0.9,
            recordings: vec![
                recording("a", None, Some("Artist")),
                recording("b", Some("Title"), None),
                recording("c", Some("Title"), Some("Artist")),
            ],
        }]))
        .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].recording_id.as_deref(), Some("c"));
    }

    #[test]
    fn test_prefers_album_release_group() {
        let mut rec = recording("r", Some("Song"), Some("Artist"));
        rec.releasegroups = vec![
            dto::ReleaseGroup {
                id: "1".into(),
                title: Some("The Single".into()),
                release_type: Some("Single".into()),
            },
            dto::ReleaseGroup {
                id: "2".into(),
                title: Some("The Album".into()),
                release_type: Some("Album".into()),
            },
        ];
        let result = convert_recording(rec, 0.5).unwrap();
        assert_eq!(result.album.as_deref(), Some("The Album"));
    }

    #[test]
    fn test_error_codes_map_to_errors() {
        let error = |code| dto::LookupResponse {
            status: "error".into(),
            results: vec![],
            error: Some(dto::ApiError {
                code,
                message: "nope".into(),
            }),
        };

        assert!(matches!(to_match_results(error(4)), Err(ProviderError::Authentication(_))));
        assert!(matches!(to_match_results(error(14)), Err(ProviderError::RateLimited(_))));
        assert!(matches!(to_match_results(error(3)), Err(ProviderError::Api(_))));
    }

    #[test]
    fn test_best_match_keeps_first_on_tie() {
        let a = MatchResult::new("A", vec!["X".into()], 80.0, "acoustid");
        let b = MatchResult::new("B", vec!["X".into()], 80.0, "acoustid");
        let c = MatchResult::new("C", vec!["X".into()], 40.0, "acoustid");

        assert_eq!(best_match(vec![a, b, c]).unwrap().title, "A");
        assert!(best_match(vec![]).is_none());
    }
}
