//! Merges noisy per-segment recognition hits into a tracklist.
//!
//! Overlapping segments usually identify the same song several times at
//! nearby positions. `add_track` keeps only the most confident of those
//! nearby duplicates; `unique_tracks` then collapses exact repeats anywhere
//! in the mix and returns the list ordered by position.

mod track;

pub use track::{format_timestamp, normalize, Track, TrackError};

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Matcher section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Seconds within which similar hits are treated as the same play
    pub time_threshold_secs: f64,
    /// Hits below this confidence are dropped
    pub min_confidence: f64,
    /// Largest group `merge_nearby_tracks` folds into one track
    pub max_group_size: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            time_threshold_secs: 30.0,
            min_confidence: 0.0,
            max_group_size: 2,
        }
    }
}

impl MatcherConfig {
    pub fn time_threshold(&self) -> Duration {
        crate::config::secs_to_duration(self.time_threshold_secs)
    }
}

/// Accumulates tracks and resolves duplicates.
///
/// Purely synchronous: feed it from any task, it never waits.
#[derive(Debug, Clone)]
pub struct TrackMatcher {
    tracks: Vec<Track>,
    time_threshold: Duration,
    min_confidence: f64,
    max_group_size: usize,
}

impl Default for TrackMatcher {
    fn default() -> Self {
        Self::new(&MatcherConfig::default())
    }
}

impl TrackMatcher {
    pub fn new(config: &MatcherConfig) -> Self {
        let min_confidence = if config.min_confidence.is_finite() {
            config.min_confidence.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            tracks: Vec::new(),
            time_threshold: config.time_threshold(),
            min_confidence,
            max_group_size: config.max_group_size.max(1),
        }
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    pub fn time_threshold(&self) -> Duration {
        self.time_threshold
    }

    /// Working set in insertion order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Offer a hit to the working set.
    ///
    /// Returns true if the track was kept (possibly replacing nearby
    /// duplicates), false if it was rejected or beaten by an existing hit.
    /// On equal confidence the existing hit wins.
    pub fn add_track(&mut self, track: Track) -> bool {
        if track.confidence() < self.min_confidence {
            tracing::debug!(
                "Rejected {} (confidence {:.1} < {:.1})",
                track,
                track.confidence(),
                self.min_confidence
            );
            return false;
        }

        let neighbours: Vec<usize> = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, existing)| {
                existing.is_similar_to(&track) && existing.distance(&track) <= self.time_threshold
            })
            .map(|(i, _)| i)
            .collect();

        if neighbours.is_empty() {
            tracing::debug!("New track {}", track);
            self.tracks.push(track);
            return true;
        }

        let best_existing = neighbours
            .iter()
            .map(|&i| self.tracks[i].confidence())
            .fold(f64::NEG_INFINITY, f64::max);

        if track.confidence() > best_existing {
            tracing::debug!(
                "{} replaces {} nearby duplicate(s) at confidence {:.1}",
                track,
                neighbours.len(),
                best_existing
            );
            let mut index = 0;
            self.tracks.retain(|_| {
                let keep = !neighbours.contains(&index);
                index += 1;
                keep
            });
            self.tracks.push(track);
            true
        } else {
            tracing::debug!("Discarded {} in favour of an existing hit", track);
            false
        }
    }

    /// Final tracklist: ordered by position, exact repeats collapsed.
    ///
    /// Repeats are matched on case-insensitive artist and title regardless
    /// of distance; the first occurrence is replaced only by a strictly more
    /// confident one.
    pub fn unique_tracks(&self) -> Vec<Track> {
        let mut ordered = self.tracks.clone();
        ordered.sort_by_key(Track::time_in_mix);

        let mut slots: Vec<Track> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();
        for track in ordered {
            match by_key.get(&track.identity_key()) {
                Some(&slot) => {
                    if track.confidence() > slots[slot].confidence() {
                        slots[slot] = track;
                    }
                }
                None => {
                    by_key.insert(track.identity_key(), slots.len());
                    slots.push(track);
                }
            }
        }

        slots.sort_by_key(Track::time_in_mix);
        slots
    }

    /// Alternative pass: group consecutive similar hits.
    ///
    /// Walks the working set by position, growing a group while the next
    /// hit is similar to and within the threshold of the group's last hit,
    /// up to `max_group_size`. Each group contributes its most confident
    /// hit unless a similar track was already emitted.
    pub fn merge_nearby_tracks(&self) -> Vec<Track> {
        let mut ordered = self.tracks.clone();
        ordered.sort_by_key(Track::time_in_mix);

        let mut merged: Vec<Track> = Vec::new();
        let mut group: Vec<Track> = Vec::new();

        for track in ordered {
            let joins = group.last().is_some_and(|last| {
                last.distance(&track) <= self.time_threshold
                    && last.is_similar_to(&track)
                    && group.len() < self.max_group_size
            });
            if !joins && !group.is_empty() {
                Self::emit_best(&mut merged, std::mem::take(&mut group));
            }
            group.push(track);
        }
        if !group.is_empty() {
            Self::emit_best(&mut merged, group);
        }

        merged
    }

    fn emit_best(merged: &mut Vec<Track>, group: Vec<Track>) {
        let Some(best) = group.into_iter().reduce(|best, candidate| {
            if candidate.confidence() > best.confidence() {
                candidate
            } else {
                best
            }
        }) else {
            return;
        };
        if !merged.iter().any(|emitted| emitted.is_similar_to(&best)) {
            merged.push(best);
        }
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}
