//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\tracklister\config.toml
//! - macOS: ~/Library/Application Support/tracklister/config.toml
//! - Linux: ~/.config/tracklister/config.toml
//!
//! Every section is optional; missing keys fall back to their defaults.
//! Each subsystem owns the struct for its own section.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::identification::IdentificationConfig;
use crate::matcher::MatcherConfig;
use crate::providers::{ProviderKind, ProvidersConfig};
use crate::rate_limit::RateLimitConfig;
use crate::segment::SegmentationConfig;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API credentials (keep separate for potential future encryption)
    pub credentials: Credentials,
    pub identification: IdentificationConfig,
    pub matcher: MatcherConfig,
    pub providers: ProvidersConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub segmentation: SegmentationConfig,
}

/// API credentials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// AcoustID application key for fingerprint lookups
    pub acoustid_api_key: Option<String>,
    pub acrcloud_access_key: Option<String>,
    pub acrcloud_access_secret: Option<String>,
}

impl Credentials {
    /// Fail unless every credential `kind` needs is present and non-blank.
    pub fn require(&self, kind: ProviderKind) -> Result<(), ConfigError> {
        let needed: Vec<(&'static str, &Option<String>)> = match kind {
            ProviderKind::AcoustId => vec![("acoustid_api_key", &self.acoustid_api_key)],
            ProviderKind::AcrCloud => vec![
                ("acrcloud_access_key", &self.acrcloud_access_key),
                ("acrcloud_access_secret", &self.acrcloud_access_secret),
            ],
        };

        match needed.iter().find(|(_, value)| is_blank(value)) {
            Some(&(credential, _)) => Err(ConfigError::MissingCredential {
                provider: kind.to_string(),
                credential,
            }),
            None => Ok(()),
        }
    }

    /// Overlay credentials given on the command line or via environment.
    pub fn merge(&mut self, other: Credentials) {
        if other.acoustid_api_key.is_some() {
            self.acoustid_api_key = other.acoustid_api_key;
        }
        if other.acrcloud_access_key.is_some() {
            self.acrcloud_access_key = other.acrcloud_access_key;
        }
        if other.acrcloud_access_secret.is_some() {
            self.acrcloud_access_secret = other.acrcloud_access_secret;
        }
    }

    /// Copy with every secret replaced, for printing.
    pub fn redacted(&self) -> Credentials {
        let mask = |value: &Option<String>| value.as_ref().map(|_| "********".to_string());
        Credentials {
            acoustid_api_key: mask(&self.acoustid_api_key),
            acrcloud_access_key: mask(&self.acrcloud_access_key),
            acrcloud_access_secret: mask(&self.acrcloud_access_secret),
        }
    }
}

impl Config {
    /// Check ranges and credentials. Any error here is fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let seg = &self.segmentation;
        check_range("segmentation.segment_length_secs", seg.segment_length_secs, 10.0, 300.0)?;
        check_range("segmentation.overlap_secs", seg.overlap_secs, 0.0, 30.0)?;
        if seg.overlap_secs >= seg.segment_length_secs {
            return Err(ConfigError::invalid(
                "segmentation.overlap_secs",
                "must be shorter than segment_length_secs",
            ));
        }
        if seg.min_segment_length_secs < 0.0 || !seg.min_segment_length_secs.is_finite() {
            return Err(ConfigError::invalid(
                "segmentation.min_segment_length_secs",
                "must be a non-negative number",
            ));
        }
        check_at_least("segmentation.workers", seg.workers as u64, 1)?;

        let matcher = &self.matcher;
        check_range("matcher.min_confidence", matcher.min_confidence, 0.0, 100.0)?;
        check_range("matcher.time_threshold_secs", matcher.time_threshold_secs, 0.0, 300.0)?;
        check_range("matcher.max_group_size", matcher.max_group_size as f64, 1.0, 10.0)?;

        let limits = &self.rate_limit;
        check_at_least("rate_limit.max_requests_per_minute", limits.max_requests_per_minute.into(), 1)?;
        check_at_least("rate_limit.max_concurrent_requests", limits.max_concurrent_requests.into(), 1)?;
        check_at_least("rate_limit.circuit_breaker_threshold", limits.circuit_breaker_threshold.into(), 1)?;
        check_range(
            "rate_limit.circuit_breaker_reset_timeout_secs",
            limits.circuit_breaker_reset_timeout_secs,
            0.0,
            86_400.0,
        )?;
        check_range("rate_limit.acquire_timeout_secs", limits.acquire_timeout_secs, 0.0, 3600.0)?;
        for (provider, override_limits) in &limits.providers {
            check_at_least(
                &format!("rate_limit.providers.{provider}.max_requests_per_minute"),
                override_limits.max_requests_per_minute.into(),
                1,
            )?;
            check_at_least(
                &format!("rate_limit.providers.{provider}.max_concurrent_requests"),
                override_limits.max_concurrent_requests.into(),
                1,
            )?;
        }

        check_at_least(
            "identification.concurrent_segments",
            self.identification.concurrent_segments as u64,
            1,
        )?;
        let timeout = self.providers.request_timeout_secs;
        check_range("providers.request_timeout_secs", timeout, 0.0, 600.0)?;
        if timeout == 0.0 {
            return Err(ConfigError::invalid(
                "providers.request_timeout_secs",
                "must be greater than zero",
            ));
        }

        for name in self.providers.provider_order() {
            let kind: ProviderKind = name.parse()?;
            self.credentials.require(kind)?;
        }
        Ok(())
    }

    /// Copy safe to print.
    pub fn redacted(&self) -> Config {
        Config {
            credentials: self.credentials.redacted(),
            ..self.clone()
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// Seconds from a config file as a `Duration`. Negative and NaN give zero,
/// values too large to represent saturate.
pub(crate) fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be between {min} and {max}, got {value}")))
    }
}

fn check_at_least(field: &str, value: u64, min: u64) -> Result<(), ConfigError> {
    if value >= min {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be at least {min}, got {value}")))
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tracklister"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from the default location
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };
    load_from(&path)
}

/// Load configuration from an explicit path, with the same fallbacks as [`load`].
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to the default location
///
/// Creates the config directory if it doesn't exist.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)
}

/// Save configuration to `path` atomically (write to temp, then rename)
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

/// Save configuration without blocking the async runtime
pub async fn save_async(config: Config) -> Result<(), ConfigError> {
    tokio::task::spawn_blocking(move || save(&config))
        .await
        .map_err(|e| ConfigError::TaskJoin(e.to_string()))?
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Provider {provider} requires {credential}")]
    MissingCredential {
        provider: String,
        credential: &'static str,
    },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Failed to initialise provider {provider}: {message}")]
    ProviderInit { provider: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
