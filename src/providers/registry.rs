//! Provider construction and lookup.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::acoustid::{AcoustIdClient, AcoustIdProvider};
use super::acrcloud::{AcrCloudClient, AcrCloudProvider};
use super::musicbrainz::MusicBrainzClient;
use super::traits::{Fpcalc, MusicBrainzApi};
use super::{ProviderError, ProvidersConfig, RecognitionProvider};
use crate::config::{ConfigError, Credentials};

/// Backends this crate can build from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    AcoustId,
    AcrCloud,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::AcoustId, ProviderKind::AcrCloud];

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::AcoustId => super::acoustid::PROVIDER_NAME,
            ProviderKind::AcrCloud => super::acrcloud::PROVIDER_NAME,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownProvider(s.to_string()))
    }
}

/// Name-keyed provider factory.
///
/// Providers are built on first use from credentials and configuration,
/// then shared. Injected providers take precedence over built ones, which is
/// how tests and embedders plug in their own backends.
pub struct ProviderRegistry {
    credentials: Credentials,
    config: ProvidersConfig,
    providers: Mutex<HashMap<String, Arc<dyn RecognitionProvider>>>,
}

impl ProviderRegistry {
    pub fn new(credentials: Credentials, config: ProvidersConfig) -> Self {
        Self {
            credentials,
            config,
            providers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProvidersConfig {
        &self.config
    }

    /// Primary provider first, then enabled fallbacks.
    pub fn provider_order(&self) -> Vec<String> {
        self.config.provider_order()
    }

    /// Add or replace a provider under its own name.
    pub fn register(&self, provider: Arc<dyn RecognitionProvider>) {
        let name = provider.name().to_string();
        tracing::debug!("Registered provider {}", name);
        self.providers.lock().insert(name, provider);
    }

    /// Shared provider for `name`, building it if needed.
    pub fn get(&self, name: &str) -> Result<Arc<dyn RecognitionProvider>, ConfigError> {
        if let Some(provider) = self.providers.lock().get(name) {
            return Ok(Arc::clone(provider));
        }

        let kind: ProviderKind = name.parse()?;
        let built = self.build(kind)?;

        // Another caller may have built or injected one meanwhile; keep theirs
        let mut providers = self.providers.lock();
        let provider = providers
            .entry(kind.name().to_string())
            .or_insert(built);
        Ok(Arc::clone(provider))
    }

    /// Check every provider in the configured order can be obtained.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in self.provider_order() {
            if self.providers.lock().contains_key(&name) {
                continue;
            }
            let kind: ProviderKind = name.parse()?;
            self.credentials.require(kind)?;
        }
        Ok(())
    }

    /// Close and forget every provider.
    pub async fn close_all(&self) {
        let providers: Vec<_> = self.providers.lock().drain().collect();
        for (name, provider) in providers {
            provider.close().await;
            tracing::debug!("Closed provider {}", name);
        }
    }

    fn build(&self, kind: ProviderKind) -> Result<Arc<dyn RecognitionProvider>, ConfigError> {
        self.credentials.require(kind)?;
        let init_error = |e: ProviderError| ConfigError::ProviderInit {
            provider: kind.to_string(),
            message: e.to_string(),
        };
        let timeout = self.config.request_timeout();

        let provider: Arc<dyn RecognitionProvider> = match kind {
            ProviderKind::AcoustId => {
                let api_key = self.credentials.acoustid_api_key.clone().unwrap_or_default();
                let lookup = AcoustIdClient::new(api_key, timeout).map_err(init_error)?;
                let musicbrainz: Option<Arc<dyn MusicBrainzApi>> =
                    if self.config.musicbrainz_enrichment {
                        Some(Arc::new(MusicBrainzClient::new(timeout).map_err(init_error)?))
                    } else {
                        None
                    };
                Arc::new(AcoustIdProvider::new(Arc::new(lookup), musicbrainz, Arc::new(Fpcalc)))
            }
            ProviderKind::AcrCloud => {
                let client = AcrCloudClient::new(
                    self.credentials.acrcloud_access_key.clone().unwrap_or_default(),
                    self.credentials.acrcloud_access_secret.clone().unwrap_or_default(),
                    &self.config.acrcloud_host,
                    timeout,
                )
                .map_err(init_error)?;
                Arc::new(AcrCloudProvider::new(Arc::new(client)))
            }
        };

        tracing::info!("Initialised provider {}", kind);
        Ok(provider)
    }
}
