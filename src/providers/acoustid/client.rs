//! AcoustID HTTP client
//!
//! See: https://acoustid.org/webservice
//!
//! ## API quirks
//!
//! The `meta` parameter uses a literal `+` as separator. URL-encoding it to
//! `%2B` makes the API silently drop the requested metadata, so the URL is
//! built by hand instead of through `.query()`.
//!
//! GET works with metadata and fingerprints of a one-minute segment fit
//! comfortably in the URL. POST, although documented for large
//! fingerprints, returns no metadata.

use std::time::Duration;

use super::{adapter, dto};
use crate::providers::fingerprint::AudioFingerprint;
use crate::providers::{http_client, MatchResult, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.acoustid.org/v2/lookup";

/// AcoustID API client
pub struct AcoustIdClient {
    api_key: String,
    http_client: reqwest::Client,
    base_url: String,
}

impl AcoustIdClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            api_key: api_key.into(),
            http_client: http_client(timeout)?,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            http_client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Look up a fingerprint and return candidate matches
    pub async fn lookup(
        &self,
        fingerprint: &AudioFingerprint,
    ) -> Result<Vec<MatchResult>, ProviderError> {
        let response = self.send_lookup_request(fingerprint).await?;
        adapter::to_match_results(response)
    }

    fn lookup_url(&self, fingerprint: &AudioFingerprint) -> String {
        format!(
            "{}?client={}&duration={}&fingerprint={}&meta=recordings+releasegroups+compress",
            self.base_url,
            urlencoding::encode(&self.api_key),
            fingerprint.duration_secs,
            urlencoding::encode(&fingerprint.fingerprint)
        )
    }

    async fn send_lookup_request(
        &self,
        fingerprint: &AudioFingerprint,
    ) -> Result<dto::LookupResponse, ProviderError> {
        let response = self
            .http_client
            .get(self.lookup_url(fingerprint))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited("AcoustID rate limit exceeded".into()));
        }

        // AcoustID reports API errors as JSON with a 400 status
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        match serde_json::from_str::<dto::LookupResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(ProviderError::Network(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            ))),
            Err(e) => Err(ProviderError::Parse(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = AcoustIdClient::new("test-key", Duration::from_secs(10)).unwrap();
        assert_eq!(client.api_key, "test-key");
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_lookup_url_keeps_literal_plus() {
        let client = AcoustIdClient::with_base_url("k&y", "http://localhost:8080");
        let url = client.lookup_url(&AudioFingerprint {
            fingerprint: "AQ+/=".into(),
            duration_secs: 60,
        });

        assert!(url.starts_with("http://localhost:8080?client=k%26y&duration=60"));
        assert!(url.contains("fingerprint=AQ%2B%2F%3D"));
        assert!(url.ends_with("meta=recordings+releasegroups+compress"));
    }
}
