//! Adapter layer: ACRCloud DTOs to [`MatchResult`].

use super::dto;
use super::PROVIDER_NAME;
use crate::providers::{MatchResult, ProviderError};

/// ACRCloud status codes
const SUCCESS: i32 = 0;
const NO_RESULT: i32 = 1001;
const INVALID_ACCESS_KEY: i32 = 2000;
const LIMIT_EXCEEDED: i32 = 3001;

/// Best match from an identify response. `Ok(None)` when nothing was recognized.
pub fn to_match_result(response: dto::IdentifyResponse) -> Result<Option<MatchResult>, ProviderError> {
    match response.status.code {
        SUCCESS => {}
        NO_RESULT => return Ok(None),
        INVALID_ACCESS_KEY => return Err(ProviderError::Authentication(response.status.msg)),
        LIMIT_EXCEEDED => return Err(ProviderError::RateLimited(response.status.msg)),
        code => {
            return Err(ProviderError::Api(format!(
                "ACRCloud error {code}: {}",
                response.status.msg
            )));
        }
    }

    let music = response.metadata.unwrap_or_default().music;
    Ok(music
        .into_iter()
        .filter_map(convert_music)
        .reduce(|best, candidate| {
            if candidate.confidence > best.confidence {
                candidate
            } else {
                best
            }
        }))
}

fn convert_music(music: dto::Music) -> Option<MatchResult> {
    if music.title.trim().is_empty() {
        return None;
    }
    let artists: Vec<String> = music
        .artists
        .into_iter()
        .map(|a| a.name)
        .filter(|name| !name.trim().is_empty())
        .collect();
    if artists.is_empty() {
        return None;
    }

    let mut result = MatchResult::new(
        music.title,
        artists,
        music.score.clamp(0.0, 100.0),
        PROVIDER_NAME,
    );
    result.album = music.album.map(|a| a.name).filter(|a| !a.is_empty());
    result.release_date = music.release_date.filter(|d| !d.is_empty());
    result.isrc = music.external_ids.and_then(|ids| ids.isrc);
    result.genres = music.genres.into_iter().map(|g| g.name).collect();
    result.recording_id = music.acrid;
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn music(title: &str, artist: &str, score: f64) -> dto::Music {
        dto::Music {
            title: title.into(),
            artists: vec![dto::Named { name: artist.into() }],
            album: Some(dto::Named { name: "Album".into() }),
            release_date: Some(String::new()),
            score,
            genres: vec![dto::Named { name: "House".into() }],
            external_ids: Some(dto::ExternalIds {
                isrc: Some("ISRC".into()),
                upc: None,
            }),
            acrid: Some("acr-1".into()),
        }
    }

    fn response(code: i32, music: Vec<dto::Music>) -> dto::IdentifyResponse {
        dto::IdentifyResponse {
            status: dto::Status {
                code,
                msg: "msg".into(),
            },
            metadata: Some(dto::Metadata { music }),
        }
    }

    #[test]
    fn test_best_scoring_music_wins() {
        let result = to_match_result(response(
            0,
            vec![music("Low", "A", 40.0), music("High", "B", 95.0)],
        ))
        .unwrap()
        .unwrap();

        assert_eq!(result.title, "High");
        assert_eq!(result.provider, "acrcloud");
        assert_eq!(result.album.as_deref(), Some("Album"));
        assert!(result.release_date.is_none());
        assert_eq!(result.isrc.as_deref(), Some("ISRC"));
        assert_eq!(result.genres, vec!["House".to_string()]);
    }

    #[test]
    fn test_no_result_is_none() {
        assert!(to_match_result(response(1001, vec![])).unwrap().is_none());
        assert!(to_match_result(response(0, vec![])).unwrap().is_none());
        assert!(to_match_result(response(0, vec![music("", "A", 90.0)])).unwrap().is_none());
    }

    #[test]
    fn test_status_codes_map_to_errors() {
        assert!(matches!(
            to_match_result(response(2000, vec![])),
            Err(ProviderError::Authentication(_))
        ));
        assert!(matches!(
            to_match_result(response(3001, vec![])),
            Err(ProviderError::RateLimited(_))
        ));
        assert!(matches!(to_match_result(response(3000, vec![])), Err(ProviderError::Api(_))));
    }
}
