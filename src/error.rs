//! Application-wide error types.
//!
//! Library modules use specific error types via `thiserror`, while the
//! CLI uses `anyhow` for convenient error propagation.
//!
//! # Design
//!
//! - [`Error`]: Top-level error enum
//! - Subsystem errors ([`CacheError`], [`ProviderError`], [`ConfigError`],
//!   [`TrackError`], [`SegmentError`], [`IdentificationError`]) for detailed
//!   handling
//!
//! # Example
//!
//! ```ignore
//! use tracklister::error::{Result, ResultExt};
//!
//! async fn warm(cache: &Cache, key: &str) -> Result<()> {
//!     cache.set(key, &"value", None, true).await.with_context("warming cache")?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::identification::IdentificationError;
use crate::matcher::TrackError;
use crate::providers::ProviderError;
use crate::segment::SegmentError;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error.
///
/// Aggregates errors from all subsystems for unified handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid track: {0}")]
    Track(#[from] TrackError),

    #[error("Segmentation error: {0}")]
    Segment(#[from] SegmentError),

    #[error("Identification error: {0}")]
    Identification(#[from] IdentificationError),

    /// Input file not found
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(ctx))
    }
}
