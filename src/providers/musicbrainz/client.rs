//! MusicBrainz HTTP client
//!
//! See: https://musicbrainz.org/doc/MusicBrainz_API
//!
//! MusicBrainz requires an identifying User-Agent and allows one request per
//! second per client. Requests through one client are spaced at least
//! [`MIN_REQUEST_SPACING`] apart.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{adapter, dto, RecordingDetails};
use crate::providers::ProviderError;

const DEFAULT_BASE_URL: &str = "https://musicbrainz.org/ws/2";

/// A little over the documented 1 req/sec
pub const MIN_REQUEST_SPACING: Duration = Duration::from_millis(1100);

const USER_AGENT: &str = concat!(
    "Tracklister/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/tracklister/tracklister)"
);

/// MusicBrainz API client
pub struct MusicBrainzClient {
    http_client: reqwest::Client,
    base_url: String,
    last_request: Mutex<Option<Instant>>,
}

impl MusicBrainzClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .gzip(true)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: DEFAULT_BASE_URL.to_string(),
            last_request: Mutex::new(None),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into(),
            last_request: Mutex::new(None),
        }
    }

    /// Look up a recording by MBID. `Ok(None)` when MusicBrainz has no such recording.
    pub async fn lookup_recording(
        &self,
        recording_id: &str,
    ) -> Result<Option<RecordingDetails>, ProviderError> {
        self.wait_turn().await;
        Ok(self
            .send_recording_request(recording_id)
            .await?
            .map(adapter::to_details))
    }

    /// Hold the slot lock while sleeping so concurrent callers queue up.
    async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + MIN_REQUEST_SPACING).await;
        }
        *last = Some(Instant::now());
    }

    fn recording_url(&self, recording_id: &str) -> String {
        format!(
            "{}/recording/{}?fmt=json&inc=artists+releases+isrcs+genres",
            self.base_url,
            urlencoding::encode(recording_id)
        )
    }

    async fn send_recording_request(
        &self,
        recording_id: &str,
    ) -> Result<Option<dto::RecordingResponse>, ProviderError> {
        let response = self
            .http_client
            .get(self.recording_url(recording_id))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        {
            return Err(ProviderError::RateLimited("MusicBrainz rate limit exceeded".into()));
        }

        if !status.is_success() {
            if let Ok(error) = response.json::<dto::ApiError>().await {
                return Err(ProviderError::Api(error.error));
            }
            return Err(ProviderError::Network(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        response
            .json::<dto::RecordingResponse>()
            .await
            .map(Some)
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}
