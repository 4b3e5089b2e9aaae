//! AcoustID recognition provider
//!
//! Fingerprints each segment with fpcalc, looks the fingerprint up on
//! AcoustID and optionally fills in album, release date, ISRC and genres
//! from MusicBrainz.
//!
//! API docs: https://acoustid.org/webservice

mod adapter;
mod client;
pub mod dto;

pub use adapter::{best_match, to_match_results};
pub use client::AcoustIdClient;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::traits::{AcoustIdApi, Fingerprinter, MusicBrainzApi};
use super::{MatchResult, ProviderError, RecognitionProvider};
use crate::segment::AudioSegment;

pub const PROVIDER_NAME: &str = "acoustid";

pub struct AcoustIdProvider {
    lookup: Arc<dyn AcoustIdApi>,
    musicbrainz: Option<Arc<dyn MusicBrainzApi>>,
    fingerprinter: Arc<dyn Fingerprinter>,
    closed: AtomicBool,
}

impl AcoustIdProvider {
    pub fn new(
        lookup: Arc<dyn AcoustIdApi>,
        musicbrainz: Option<Arc<dyn MusicBrainzApi>>,
        fingerprinter: Arc<dyn Fingerprinter>,
    ) -> Self {
        Self {
            lookup,
            musicbrainz,
            fingerprinter,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), ProviderError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProviderError::Closed(PROVIDER_NAME.into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecognitionProvider for AcoustIdProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn identify(&self, segment: &AudioSegment) -> Result<Option<MatchResult>, ProviderError> {
        self.ensure_open()?;

        let fingerprinter = Arc::clone(&self.fingerprinter);
        let path = segment.path.clone();
        let fingerprint = tokio::task::spawn_blocking(move || fingerprinter.fingerprint(&path))
            .await
            .map_err(|e| ProviderError::Fingerprint(e.to_string()))??;

        let candidates = self.lookup.lookup(&fingerprint).await?;
        let best = best_match(candidates);
        match &best {
            Some(m) => tracing::debug!(
                "AcoustID matched {} - {} ({:.0}%) at {:.0}s",
                m.artist_string(),
                m.title,
                m.confidence,
                segment.start.as_secs_f64()
            ),
            None => tracing::debug!("AcoustID: no match at {:.0}s", segment.start.as_secs_f64()),
        }
        Ok(best)
    }

    async fn enrich(&self, candidate: MatchResult) -> Result<MatchResult, ProviderError> {
        self.ensure_open()?;
        let (Some(musicbrainz), Some(recording_id)) =
            (&self.musicbrainz, candidate.recording_id.clone())
        else {
            return Ok(candidate);
        };

        match musicbrainz.lookup_recording(&recording_id).await? {
            Some(details) => Ok(details.apply_to(candidate)),
            None => Ok(candidate),
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Closed AcoustID provider");
        }
    }
}
