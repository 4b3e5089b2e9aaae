//! What an identification run hands back.

use std::time::Duration;

use serde::Serialize;

use crate::matcher::{format_timestamp, Track};

/// Per-segment outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Segments that finished processing
    pub segments: usize,
    /// Segments with a match, from a provider or the cache
    pub identified: usize,
    /// Segments every consulted provider had no answer for
    pub no_match: usize,
    /// Segments answered from the cache
    pub cache_hits: usize,
    /// Segments where every provider was denied admission or failed
    pub skipped: usize,
    /// Matches dropped as invalid tracks or below the confidence floor
    pub rejected: usize,
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct IdentificationReport {
    /// Deduplicated, ordered by position in the mix
    pub tracks: Vec<Track>,
    pub stats: RunStats,
    #[serde(serialize_with = "serialize_secs")]
    pub input_duration: Duration,
}

impl IdentificationReport {
    /// Header for an export writer.
    pub fn mix_info(
        &self,
        title: impl Into<String>,
        artist: impl Into<String>,
        date: impl Into<String>,
    ) -> MixInfo {
        MixInfo::new(title, artist, date, &self.tracks)
    }

    pub fn duration_label(&self) -> String {
        format_timestamp(self.input_duration)
    }
}

/// Mix metadata passed alongside the tracks to export writers.
///
/// `track_count` is taken from the track list itself, so the two can never
/// disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MixInfo {
    title: String,
    artist: String,
    date: String,
    track_count: usize,
}

impl MixInfo {
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        date: impl Into<String>,
        tracks: &[Track],
    ) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            date: date.into(),
            track_count: tracks.len(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn track_count(&self) -> usize {
        self.track_count
    }
}

fn serialize_secs<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::track;

    fn report() -> IdentificationReport {
        IdentificationReport {
            tracks: vec![
                track("Song A", "Artist", 0, 90.0),
                track("Song B", "Artist", 3725, 80.0),
            ],
            stats: RunStats::default(),
            input_duration: Duration::from_secs(3900),
        }
    }

    #[test]
    fn test_mix_info_counts_tracks() {
        let report = report();
        let info = report.mix_info("Essential Mix", "DJ", "2024-01-01");
        assert_eq!(info.track_count(), report.tracks.len());
        assert_eq!(info.title(), "Essential Mix");
    }

    #[test]
    fn test_duration_label() {
        assert_eq!(report().duration_label(), "01:05:00");
        assert_eq!(report().tracks[1].to_string(), "[01:02:05] Artist - Song B");
    }

    #[test]
    fn test_report_json_shape() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["input_duration"], 3900.0);
        assert_eq!(json["tracks"][1]["time_in_mix"], 3725.0);
        assert_eq!(json["stats"]["segments"], 0);
    }
}
