//! Adapter layer: MusicBrainz DTOs to [`RecordingDetails`].

use serde::{Deserialize, Serialize};

use super::dto;
use crate::providers::MatchResult;

/// What MusicBrainz adds to a match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingDetails {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub release_date: Option<String>,
    pub isrc: Option<String>,
    pub genres: Vec<String>,
}

impl RecordingDetails {
    /// Fill gaps in `candidate`. Existing values are never overwritten.
    pub fn apply_to(self, mut candidate: MatchResult) -> MatchResult {
        if candidate.album.is_none() {
            candidate.album = self.album;
        }
        if candidate.release_date.is_none() {
            candidate.release_date = self.release_date;
        }
        if candidate.isrc.is_none() {
            candidate.isrc = self.isrc;
        }
        if candidate.genres.is_empty() {
            candidate.genres = self.genres;
        }
        candidate
    }
}

pub fn to_details(response: dto::RecordingResponse) -> RecordingDetails {
    let release = pick_release(&response.releases);

    RecordingDetails {
        artist: build_artist_string(&response.artist_credit),
        album: release.map(|r| r.title.clone()),
        release_date: response
            .first_release_date
            .clone()
            .filter(|d| !d.is_empty())
            .or_else(|| release.and_then(|r| r.date.clone())),
        isrc: response.isrcs.first().cloned(),
        genres: top_genres(&response.genres),
        title: response.title,
    }
}

/// Join artist credits using their join phrases.
fn build_artist_string(credits: &[dto::ArtistCredit]) -> Option<String> {
    if credits.is_empty() {
        return None;
    }

    let mut result = String::new();
    for credit in credits {
        result.push_str(credit.name.as_ref().unwrap_or(&credit.artist.name));
        if let Some(ref join) = credit.joinphrase {
            result.push_str(join);
        }
    }
    Some(result)
}

/// Official album, then any official release, then anything.
fn pick_release(releases: &[dto::Release]) -> Option<&dto::Release> {
    releases
        .iter()
        .find(|r| {
            r.status.as_deref() == Some("Official")
                && r.release_group
                    .as_ref()
                    .and_then(|rg| rg.primary_type.as_deref())
                    == Some("Album")
        })
        .or_else(|| releases.iter().find(|r| r.status.as_deref() == Some("Official")))
        .or_else(|| releases.first())
}

/// Top five genres by vote count, title-cased.
fn top_genres(genres: &[dto::Genre]) -> Vec<String> {
    let mut sorted: Vec<_> = genres.iter().filter(|g| g.count > 0).collect();
    sorted.sort_by(|a, b| b.count.cmp(&a.count));

    sorted
        .into_iter()
        .take(5)
        .map(|g| {
            g.name
                .split_whitespace()
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(title: &str, status: Option<&str>, kind: Option<&str>) -> dto::Release {
        dto::Release {
            id: format!("{title}-id"),
            title: title.to_string(),
            status: status.map(String::from),
            date: Some("1999-05-01".into()),
            release_group: Some(dto::ReleaseGroup {
                id: "rg".into(),
                title: title.to_string(),
                primary_type: kind.map(String::from),
            }),
        }
    }

    fn credit(name: &str, join: Option<&str>) -> dto::ArtistCredit {
        dto::ArtistCredit {
            artist: dto::Artist {
                id: format!("{}-id", name.to_lowercase()),
                name: name.to_string(),
                sort_name: None,
            },
            name: Some(name.to_string()),
            joinphrase: join.map(String::from),
        }
    }

    #[test]
    fn test_artist_string_with_join_phrases() {
        let credits = vec![credit("Daft Punk", Some(" feat. ")), credit("Pharrell", None)];
        assert_eq!(
            build_artist_string(&credits).as_deref(),
            Some("Daft Punk feat. Pharrell")
        );
        assert!(build_artist_string(&[]).is_none());
    }

    #[test]
    fn test_prefers_official_album() {
        let releases = vec![
            release("Bootleg", Some("Bootleg"), Some("Album")),
            release("Single", Some("Official"), Some("Single")),
            release("Album", Some("Official"), Some("Album")),
        ];
        assert_eq!(pick_release(&releases).unwrap().title, "Album");
    }

    #[test]
    fn test_genres_sorted_and_capped() {
        let genres: Vec<dto::Genre> = [("deep house", 3), ("techno", 9), ("noise", 0)]
            .iter()
            .map(|(name, count)| dto::Genre {
                name: name.to_string(),
                count: *count,
            })
            .collect();
        assert_eq!(top_genres(&genres), vec!["Techno", "Deep House"]);
    }

    #[test]
    fn test_apply_only_fills_gaps() {
        let details = RecordingDetails {
            title: "Song".into(),
            artist: None,
            album: Some("MB Album".into()),
            release_date: Some("2001".into()),
            isrc: Some("ISRC1".into()),
            genres: vec!["House".into()],
        };
        let mut candidate = MatchResult::new("Song", vec!["A".into()], 80.0, "acoustid");
        candidate.album = Some("Provider Album".into());

        let merged = details.apply_to(candidate);
        assert_eq!(merged.album.as_deref(), Some("Provider Album"));
        assert_eq!(merged.release_date.as_deref(), Some("2001"));
        assert_eq!(merged.isrc.as_deref(), Some("ISRC1"));
        assert_eq!(merged.genres, vec!["House".to_string()]);
    }

    #[test]
    fn test_release_date_falls_back_to_release() {
        let response = dto::RecordingResponse {
            id: "r".into(),
            title: "Song".into(),
            length: None,
            first_release_date: None,
            artist_credit: vec![],
            releases: vec![release("Album", Some("Official"), Some("Album"))],
            isrcs: vec![],
            genres: vec![],
        };
        let details = to_details(response);
        assert_eq!(details.release_date.as_deref(), Some("1999-05-01"));
        assert_eq!(details.album.as_deref(), Some("Album"));
    }
}
