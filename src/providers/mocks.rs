//! Mock implementations for testing.
//!
//! Service-level mocks stand in for the HTTP clients and fpcalc behind the
//! traits in [`super::traits`]. [`MockProvider`] stands in for a whole
//! recognition backend when testing the identification pipeline.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::fingerprint::AudioFingerprint;
use super::musicbrainz::RecordingDetails;
use super::traits::{AcoustIdApi, AcrCloudApi, Fingerprinter, MusicBrainzApi};
use super::{MatchResult, ProviderError, RecognitionProvider};
use crate::segment::AudioSegment;

/// Mock AcoustID client that returns predefined candidates.
pub struct MockAcoustId {
    pub results: Vec<MatchResult>,
    pub error: Option<ProviderError>,
}

impl MockAcoustId {
    pub fn no_matches() -> Self {
        Self {
            results: vec![],
            error: None,
        }
    }

    /// One candidate per `(title, score)`, score in AcoustID's 0-1 range.
    pub fn matches(candidates: &[(&str, f32)]) -> Self {
        let results = candidates
            .iter()
            .enumerate()
            .map(|(i, (title, score))| {
                let mut result = MatchResult::new(
                    *title,
                    vec!["Test Artist".to_string()],
                    f64::from(*score) * 100.0,
                    "acoustid",
                );
                result.recording_id = Some(format!("mbid-{i}"));
                result
            })
            .collect();
        Self {
            results,
            error: None,
        }
    }

    pub fn with_error(error: ProviderError) -> Self {
        Self {
            results: vec![],
            error: Some(error),
        }
    }
}

#[async_trait]
impl AcoustIdApi for MockAcoustId {
    async fn lookup(
        &self,
        _fingerprint: &AudioFingerprint,
    ) -> Result<Vec<MatchResult>, ProviderError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.results.clone()),
        }
    }
}

/// Mock MusicBrainz client.
pub struct MockMusicBrainz {
    pub result: Option<RecordingDetails>,
    pub error: Option<ProviderError>,
}

impl MockMusicBrainz {
    pub fn with_album(album: &str, release_date: &str) -> Self {
        Self {
            result: Some(RecordingDetails {
                title: "Test Song".into(),
                album: Some(album.into()),
                release_date: Some(release_date.into()),
                ..Default::default()
            }),
            error: None,
        }
    }

    pub fn with_error(error: ProviderError) -> Self {
        Self {
            result: None,
            error: Some(error),
        }
    }
}

#[async_trait]
impl MusicBrainzApi for MockMusicBrainz {
    async fn lookup_recording(
        &self,
        _recording_id: &str,
    ) -> Result<Option<RecordingDetails>, ProviderError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.result.clone()),
        }
    }
}

/// Mock ACRCloud client; remembers the size of the last upload.
pub struct MockAcrCloud {
    result: Option<MatchResult>,
    last_sample_len: Mutex<Option<usize>>,
}

impl MockAcrCloud {
    pub fn returning(result: Option<MatchResult>) -> Self {
        Self {
            result,
            last_sample_len: Mutex::new(None),
        }
    }

    pub fn last_sample_len(&self) -> Option<usize> {
        *self.last_sample_len.lock()
    }
}

#[async_trait]
impl AcrCloudApi for MockAcrCloud {
    async fn identify(&self, sample: Vec<u8>) -> Result<Option<MatchResult>, ProviderError> {
        *self.last_sample_len.lock() = Some(sample.len());
        Ok(self.result.clone())
    }
}

/// Fingerprinter that never touches the file.
pub struct StaticFingerprint;

impl Fingerprinter for StaticFingerprint {
    fn fingerprint(&self, _path: &Path) -> Result<AudioFingerprint, ProviderError> {
        Ok(AudioFingerprint {
            fingerprint: "AQADtMmybfGO8NCNEESLnzHyXNOHeHnG".into(),
            duration_secs: 60,
        })
    }
}

/// Scriptable recognition provider.
///
/// Answers are keyed by segment start (whole seconds); anything unscripted
/// gets the default answer, `Ok(None)` unless changed.
pub struct MockProvider {
    name: String,
    answers: HashMap<u64, Result<Option<MatchResult>, ProviderError>>,
    default: Result<Option<MatchResult>, ProviderError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    enrich_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            answers: HashMap::new(),
            default: Ok(None),
            delay: None,
            calls: AtomicUsize::new(0),
            enrich_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_match_at(mut self, start_secs: u64, title: &str, artist: &str, confidence: f64) -> Self {
        let result = MatchResult::new(title, vec![artist.to_string()], confidence, self.name.clone());
        self.answers.insert(start_secs, Ok(Some(result)));
        self
    }

    pub fn with_error_at(mut self, start_secs: u64, error: ProviderError) -> Self {
        self.answers.insert(start_secs, Err(error));
        self
    }

    /// Answer every unscripted segment with this match.
    pub fn always_matching(mut self, title: &str, artist: &str, confidence: f64) -> Self {
        self.default = Ok(Some(MatchResult::new(
            title,
            vec![artist.to_string()],
            confidence,
            self.name.clone(),
        )));
        self
    }

    pub fn always_failing(mut self, error: ProviderError) -> Self {
        self.default = Err(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn enrich_calls(&self) -> usize {
        self.enrich_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn identify(&self, segment: &AudioSegment) -> Result<Option<MatchResult>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answers
            .get(&segment.start.as_secs())
            .unwrap_or(&self.default)
            .clone()
    }

    async fn enrich(&self, mut candidate: MatchResult) -> Result<MatchResult, ProviderError> {
        self.enrich_calls.fetch_add(1, Ordering::SeqCst);
        if candidate.album.is_none() {
            candidate.album = Some(format!("{} album", self.name));
        }
        Ok(candidate)
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_acoustid_scores_scaled() {
        let mock = MockAcoustId::matches(&[("Song", 0.95)]);
        let results = mock
            .lookup(&StaticFingerprint.fingerprint(Path::new("x")).unwrap())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].confidence - 95.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_mock_provider_scripted_answers() {
        let provider = MockProvider::new("mock")
            .with_match_at(60, "Song", "Artist", 90.0)
            .with_error_at(120, ProviderError::Network("down".into()));

        let at = |secs| AudioSegment::new("seg.mp3", Duration::from_secs(secs), Duration::from_secs(60));

        assert!(provider.identify(&at(0)).await.unwrap().is_none());
        assert_eq!(provider.identify(&at(60)).await.unwrap().unwrap().title, "Song");
        assert!(provider.identify(&at(120)).await.is_err());
        assert_eq!(provider.calls(), 3);
    }
}
