//! ACRCloud HTTP client
//!
//! Uploads a sample as multipart form data, signed with HMAC-SHA1 over
//! `POST\n/v1/identify\n{access_key}\naudio\n1\n{timestamp}`.
//!
//! See: https://docs.acrcloud.com/reference/identification-api

use std::time::Duration;

use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::multipart::{Form, Part};

use super::{adapter, dto};
use crate::providers::{http_client, MatchResult, ProviderError};

type HmacSha1 = Hmac<sha1::Sha1>;

const ENDPOINT: &str = "/v1/identify";
const DATA_TYPE: &str = "audio";
const SIGNATURE_VERSION: &str = "1";

/// ACRCloud API client
pub struct AcrCloudClient {
    access_key: String,
    access_secret: String,
    http_client: reqwest::Client,
    base_url: String,
}

impl AcrCloudClient {
    pub fn new(
        access_key: impl Into<String>,
        access_secret: impl Into<String>,
        host: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            access_key: access_key.into(),
            access_secret: access_secret.into(),
            http_client: http_client(timeout)?,
            base_url: format!("https://{host}"),
        })
    }

    /// Identify a raw audio sample.
    pub async fn identify(&self, sample: Vec<u8>) -> Result<Option<MatchResult>, ProviderError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let form = self.build_form(sample, &timestamp)?;

        let response = self
            .http_client
            .post(format!("{}{}", self.base_url, ENDPOINT))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Authentication("Invalid ACRCloud credentials".into()));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited("ACRCloud rate limit exceeded".into()));
        }
        if !status.is_success() {
            return Err(ProviderError::Api(format!("ACRCloud HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let parsed: dto::IdentifyResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::Parse(format!(
                "{e}; response: {}",
                body.chars().take(200).collect::<String>()
            ))
        })?;
        adapter::to_match_result(parsed)
    }

    fn build_form(&self, sample: Vec<u8>, timestamp: &str) -> Result<Form, ProviderError> {
        let signature = self.sign(timestamp)?;
        let sample_bytes = sample.len().to_string();
        let part = Part::bytes(sample).file_name("sample.mp3");

        Ok(Form::new()
            .text("access_key", self.access_key.clone())
            .text("sample_bytes", sample_bytes)
            .text("timestamp", timestamp.to_string())
            .text("signature", signature)
            .text("data_type", DATA_TYPE)
            .text("signature_version", SIGNATURE_VERSION)
            .part("sample", part))
    }

    fn sign(&self, timestamp: &str) -> Result<String, ProviderError> {
        let string_to_sign = string_to_sign(&self.access_key, timestamp);
        let mut mac = HmacSha1::new_from_slice(self.access_secret.as_bytes())
            .map_err(|e| ProviderError::Authentication(e.to_string()))?;
        mac.update(string_to_sign.as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }
}

fn string_to_sign(access_key: &str, timestamp: &str) -> String {
    ["POST", ENDPOINT, access_key, DATA_TYPE, SIGNATURE_VERSION, timestamp].join("\n")
}
