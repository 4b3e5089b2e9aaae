//! ACRCloud recognition provider
//!
//! Uploads the segment audio itself; no local fingerprinting. ACRCloud has
//! nothing to add after identification, so `enrich` is the default
//! pass-through.

mod adapter;
mod client;
pub mod dto;

pub use adapter::to_match_result;
pub use client::AcrCloudClient;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::traits::AcrCloudApi;
use super::{MatchResult, ProviderError, RecognitionProvider};
use crate::segment::AudioSegment;

pub const PROVIDER_NAME: &str = "acrcloud";

pub const DEFAULT_HOST: &str = "identify-eu-west-1.acrcloud.com";

pub struct AcrCloudProvider {
    api: Arc<dyn AcrCloudApi>,
    closed: AtomicBool,
}

impl AcrCloudProvider {
    pub fn new(api: Arc<dyn AcrCloudApi>) -> Self {
        Self {
            api,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RecognitionProvider for AcrCloudProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn identify(&self, segment: &AudioSegment) -> Result<Option<MatchResult>, ProviderError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProviderError::Closed(PROVIDER_NAME.into()));
        }

        let sample = segment
            .read_bytes()
            .await
            .map_err(|e| ProviderError::Io(format!("{}: {e}", segment.path.display())))?;
        if sample.is_empty() {
            return Err(ProviderError::Io(format!("{} is empty", segment.path.display())));
        }

        let result = self.api.identify(sample).await?;
        if result.is_none() {
            tracing::debug!("ACRCloud: no match at {:.0}s", segment.start.as_secs_f64());
        }
        Ok(result)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Closed ACRCloud provider");
        }
    }
}
