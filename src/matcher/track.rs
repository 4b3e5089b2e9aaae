//! Identified track value type.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Why a track could not be constructed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    #[error("Track title must not be empty")]
    EmptyTitle,

    #[error("Track artist must not be empty")]
    EmptyArtist,

    #[error("Confidence {0} is outside 0-100")]
    InvalidConfidence(f64),
}

/// A song identified at a position in the mix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    title: String,
    artist: String,
    #[serde(with = "duration_secs")]
    time_in_mix: Duration,
    confidence: f64,
}

impl Track {
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        time_in_mix: Duration,
        confidence: f64,
    ) -> Result<Self, TrackError> {
        let title = title.into().trim().to_string();
        let artist = artist.into().trim().to_string();

        if title.is_empty() {
            return Err(TrackError::EmptyTitle);
        }
        if artist.is_empty() {
            return Err(TrackError::EmptyArtist);
        }
        if !confidence.is_finite() || !(0.0..=100.0).contains(&confidence) {
            return Err(TrackError::InvalidConfidence(confidence));
        }

        Ok(Self {
            title,
            artist,
            time_in_mix,
            confidence,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn time_in_mix(&self) -> Duration {
        self.time_in_mix
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Same song by name, ignoring case and punctuation. Never time-aware.
    pub fn is_similar_to(&self, other: &Track) -> bool {
        normalize(&self.title) == normalize(&other.title)
            && normalize(&self.artist) == normalize(&other.artist)
    }

    /// Key used by the final exact-duplicate pass.
    pub(crate) fn identity_key(&self) -> String {
        format!("{}|{}", self.artist.to_lowercase(), self.title.to_lowercase())
    }

    /// `time_in_mix` as `HH:MM:SS`.
    pub fn timestamp(&self) -> String {
        format_timestamp(self.time_in_mix)
    }

    /// Absolute time distance to another track.
    pub fn distance(&self, other: &Track) -> Duration {
        self.time_in_mix.abs_diff(other.time_in_mix)
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} - {}", self.timestamp(), self.artist, self.title)
    }
}

/// Lowercase and drop everything but letters, digits, `_` and whitespace.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Format a mix position as `HH:MM:SS`.
pub fn format_timestamp(position: Duration) -> String {
    let total = position.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}
