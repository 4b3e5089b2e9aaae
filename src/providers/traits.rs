//! Seams between providers and the services they call.
//!
//! Providers talk to their HTTP clients and to fpcalc through these traits,
//! so tests can swap in the mocks from [`super::mocks`].

use std::path::Path;

use async_trait::async_trait;

use super::fingerprint::{self, AudioFingerprint};
use super::musicbrainz::RecordingDetails;
use super::{MatchResult, ProviderError};

/// AcoustID fingerprint lookup.
#[async_trait]
pub trait AcoustIdApi: Send + Sync {
    /// Candidate matches for a fingerprint, in response order.
    async fn lookup(&self, fingerprint: &AudioFingerprint)
    -> Result<Vec<MatchResult>, ProviderError>;
}

/// MusicBrainz recording lookup.
#[async_trait]
pub trait MusicBrainzApi: Send + Sync {
    /// Details for a recording MBID; `None` if MusicBrainz does not know it.
    async fn lookup_recording(
        &self,
        recording_id: &str,
    ) -> Result<Option<RecordingDetails>, ProviderError>;
}

/// ACRCloud sample identification.
#[async_trait]
pub trait AcrCloudApi: Send + Sync {
    async fn identify(&self, sample: Vec<u8>) -> Result<Option<MatchResult>, ProviderError>;
}

/// Produces fingerprints for audio files. Blocking.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, path: &Path) -> Result<AudioFingerprint, ProviderError>;
}

/// The system `fpcalc` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fpcalc;

impl Fingerprinter for Fpcalc {
    fn fingerprint(&self, path: &Path) -> Result<AudioFingerprint, ProviderError> {
        fingerprint::generate_fingerprint(path)
    }
}

#[async_trait]
impl AcoustIdApi for super::acoustid::AcoustIdClient {
    async fn lookup(
        &self,
        fingerprint: &AudioFingerprint,
    ) -> Result<Vec<MatchResult>, ProviderError> {
        self.lookup(fingerprint).await
    }
}

#[async_trait]
impl MusicBrainzApi for super::musicbrainz::MusicBrainzClient {
    async fn lookup_recording(
        &self,
        recording_id: &str,
    ) -> Result<Option<RecordingDetails>, ProviderError> {
        self.lookup_recording(recording_id).await
    }
}

#[async_trait]
impl AcrCloudApi for super::acrcloud::AcrCloudClient {
    async fn identify(&self, sample: Vec<u8>) -> Result<Option<MatchResult>, ProviderError> {
        self.identify(sample).await
    }
}
