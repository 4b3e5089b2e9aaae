//! Identification pipeline.
//!
//! Drives every segment through cache lookup, admission control and the
//! configured providers, then folds the answers into a tracklist.
//!
//! ```text
//! segment ──► cache ──hit──────────────────────────────┐
//!               │miss                                   ▼
//!               └─► limiter ─grant─► provider ─► cache ─► matcher
//!                      │deny / error                    ▲
//!                      └─► next fallback provider ──────┘
//! ```

mod report;

pub use report::{IdentificationReport, MixInfo, RunStats};

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::config::{Config, ConfigError};
use crate::matcher::{MatcherConfig, Track, TrackMatcher};
use crate::providers::{MatchResult, ProviderError, ProviderRegistry, RecognitionProvider};
use crate::rate_limit::RateLimiter;
use crate::segment::AudioSegment;

/// Identification section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentificationConfig {
    /// Segments in flight at once
    pub concurrent_segments: usize,
    /// Ask the answering provider to fill in extra metadata
    pub enrich_results: bool,
}

impl Default for IdentificationConfig {
    fn default() -> Self {
        Self {
            concurrent_segments: 4,
            enrich_results: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum IdentificationError {
    #[error("No tracks identified in {segments} segments ({input_duration:?} of audio)")]
    NoResults {
        segments: usize,
        input_duration: Duration,
    },

    #[error("Identification cancelled after {processed} segments")]
    Cancelled { processed: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Shared services for a run, built once and handed to the manager.
#[derive(Clone)]
pub struct PipelineContext {
    /// `None` runs every segment against the providers
    pub cache: Option<Arc<Cache>>,
    pub limiter: Arc<RateLimiter>,
    pub registry: Arc<ProviderRegistry>,
}

impl PipelineContext {
    pub fn new(
        cache: Option<Arc<Cache>>,
        limiter: Arc<RateLimiter>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            cache,
            limiter,
            registry,
        }
    }

    /// Build every service from configuration.
    ///
    /// A cache that cannot be opened is logged and left out; results are the
    /// same without it.
    pub async fn from_config(config: &Config) -> Self {
        let cache = if config.cache.enabled {
            match Cache::from_config(&config.cache).await {
                Ok(cache) => Some(Arc::new(cache)),
                Err(e) => {
                    tracing::warn!("Cache unavailable, continuing without it: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            cache,
            limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            registry: Arc::new(ProviderRegistry::new(
                config.credentials.clone(),
                config.providers.clone(),
            )),
        }
    }
}

/// How one segment ended.
#[derive(Debug)]
enum SegmentOutcome {
    Identified { result: MatchResult, cached: bool },
    NoMatch { cached: bool },
    Skipped,
    Cancelled,
}

/// Result of offering a segment to one provider.
enum ProviderCall {
    /// Definitive answer, match or not
    Answered(Option<MatchResult>),
    /// Denied admission, errored or timed out
    Failed,
    Cancelled,
}

/// Runs segments through providers and merges the answers.
pub struct IdentificationManager {
    ctx: PipelineContext,
    providers: Vec<Arc<dyn RecognitionProvider>>,
    matcher: MatcherConfig,
    concurrency: usize,
    enrich: bool,
    request_timeout: Duration,
    acquire_timeout: Duration,
    cache_ttl_seconds: Option<u64>,
    compress: bool,
}

impl IdentificationManager {
    /// Resolve the configured providers. Unknown providers and missing
    /// credentials fail here, before any segment is touched.
    pub fn new(ctx: PipelineContext, config: &Config) -> Result<Self, IdentificationError> {
        let providers = ctx
            .registry
            .provider_order()
            .iter()
            .map(|name| ctx.registry.get(name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            providers,
            matcher: config.matcher.clone(),
            concurrency: config.identification.concurrent_segments.max(1),
            enrich: config.identification.enrich_results,
            request_timeout: config.providers.request_timeout(),
            acquire_timeout: config.rate_limit.acquire_timeout(),
            cache_ttl_seconds: Some(config.cache.ttl_seconds),
            compress: config.cache.compression,
            ctx,
        })
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Identify every segment in `segments` and return the merged tracklist.
    ///
    /// Segments run concurrently; the matcher only looks at positions, so
    /// completion order does not matter. Cancelling stops new segments from
    /// being taken and in-flight ones from reaching a provider.
    pub async fn identify_tracks<S>(
        &self,
        segments: S,
        cancel: &CancellationToken,
    ) -> Result<IdentificationReport, IdentificationError>
    where
        S: Stream<Item = AudioSegment> + Send,
    {
        let mut matcher = TrackMatcher::new(&self.matcher);
        let mut stats = RunStats::default();
        let mut input_duration = Duration::ZERO;

        let outcomes = segments
            .take_until(cancel.cancelled())
            .map(move |segment| async move {
                let outcome = self.process_segment(&segment, cancel).await;
                (segment, outcome)
            })
            .buffer_unordered(self.concurrency);
        futures::pin_mut!(outcomes);

        while let Some((segment, outcome)) = outcomes.next().await {
            input_duration = input_duration.max(segment.end());

            let (result, cached) = match outcome {
                SegmentOutcome::Cancelled => continue,
                SegmentOutcome::Skipped => {
                    stats.segments += 1;
                    stats.skipped += 1;
                    continue;
                }
                SegmentOutcome::NoMatch { cached } => {
                    stats.segments += 1;
                    stats.no_match += 1;
                    stats.cache_hits += usize::from(cached);
                    continue;
                }
                SegmentOutcome::Identified { result, cached } => (result, cached),
            };
            stats.segments += 1;
            stats.identified += 1;
            stats.cache_hits += usize::from(cached);

            let track = match Track::new(
                result.title.as_str(),
                result.artist_string(),
                segment.start,
                result.confidence,
            ) {
                Ok(track) => track,
                Err(e) => {
                    tracing::warn!(
                        "Dropping {} match at {:.0}s: {}",
                        result.provider,
                        segment.start.as_secs_f64(),
                        e
                    );
                    stats.rejected += 1;
                    continue;
                }
            };

            if track.confidence() < matcher.min_confidence() {
                stats.rejected += 1;
            }
            matcher.add_track(track);
        }

        if let Some(cache) = &self.ctx.cache
            && let Err(e) = cache.flush().await
        {
            tracing::warn!("Failed to flush cache index: {}", e);
        }

        if cancel.is_cancelled() {
            tracing::info!("Identification cancelled after {} segments", stats.segments);
            return Err(IdentificationError::Cancelled {
                processed: stats.segments,
            });
        }

        let tracks = matcher.unique_tracks();
        tracing::info!(
            "Processed {} segments: {} identified ({} from cache), {} no match, {} skipped, {} tracks",
            stats.segments,
            stats.identified,
            stats.cache_hits,
            stats.no_match,
            stats.skipped,
            tracks.len()
        );

        if tracks.is_empty() {
            return Err(IdentificationError::NoResults {
                segments: stats.segments,
                input_duration,
            });
        }

        Ok(IdentificationReport {
            tracks,
            stats,
            input_duration,
        })
    }

    /// Try each provider in order until one answers.
    async fn process_segment(
        &self,
        segment: &AudioSegment,
        cancel: &CancellationToken,
    ) -> SegmentOutcome {
        let content_hash = match &self.ctx.cache {
            Some(_) => match segment.content_hash().await {
                Ok(hash) => Some(hash),
                Err(e) => {
                    tracing::warn!(
                        "Cannot hash {}, not caching this segment: {}",
                        segment.path.display(),
                        e
                    );
                    None
                }
            },
            None => None,
        };

        for provider in &self.providers {
            let key = content_hash
                .as_deref()
                .map(|hash| cache_key(provider.name(), segment, hash));

            if let Some(answer) = self.cached_answer(key.as_deref()).await {
                return match answer {
                    Some(result) => SegmentOutcome::Identified {
                        result,
                        cached: true,
                    },
                    None => SegmentOutcome::NoMatch { cached: true },
                };
            }

            if cancel.is_cancelled() {
                return SegmentOutcome::Cancelled;
            }

            match self.call_provider(provider.as_ref(), segment, cancel).await {
                ProviderCall::Answered(answer) => {
                    self.store_answer(key.as_deref(), &answer).await;
                    return match answer {
                        Some(result) => SegmentOutcome::Identified {
                            result,
                            cached: false,
                        },
                        None => SegmentOutcome::NoMatch { cached: false },
                    };
                }
                ProviderCall::Failed => continue,
                ProviderCall::Cancelled => return SegmentOutcome::Cancelled,
            }
        }

        tracing::warn!(
            "Skipping segment at {:.0}s: no provider could answer",
            segment.start.as_secs_f64()
        );
        SegmentOutcome::Skipped
    }

    /// `Some(answer)` on a cache hit; lookup errors count as a miss.
    async fn cached_answer(&self, key: Option<&str>) -> Option<Option<MatchResult>> {
        let (Some(cache), Some(key)) = (&self.ctx.cache, key) else {
            return None;
        };
        match cache.get::<Option<MatchResult>>(key).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("Cache lookup failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn store_answer(&self, key: Option<&str>, answer: &Option<MatchResult>) {
        let (Some(cache), Some(key)) = (&self.ctx.cache, key) else {
            return;
        };
        if let Err(e) = cache
            .set(key, answer, self.cache_ttl_seconds, self.compress)
            .await
        {
            tracing::warn!("Failed to cache result for {}: {}", key, e);
        }
    }

    /// Admit, call, release, report.
    async fn call_provider(
        &self,
        provider: &dyn RecognitionProvider,
        segment: &AudioSegment,
        cancel: &CancellationToken,
    ) -> ProviderCall {
        let name = provider.name();
        let admission = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ProviderCall::Cancelled,
            permit = self.ctx.limiter.acquire_permit(name, self.acquire_timeout) => permit,
        };
        let Some(permit) = admission else {
            tracing::warn!(
                "{} denied admission for segment at {:.0}s",
                name,
                segment.start.as_secs_f64()
            );
            return ProviderCall::Failed;
        };
        if cancel.is_cancelled() {
            permit.abandon();
            return ProviderCall::Cancelled;
        }

        let outcome = match tokio::time::timeout(self.request_timeout, provider.identify(segment)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.request_timeout)),
        };
        drop(permit);
        self.ctx.limiter.report_result(name, outcome.is_ok());

        match outcome {
            Ok(Some(result)) if self.enrich => {
                ProviderCall::Answered(Some(self.enrich(provider, result).await))
            }
            Ok(answer) => ProviderCall::Answered(answer),
            Err(e) => {
                tracing::warn!(
                    "{} failed for segment at {:.0}s: {}",
                    name,
                    segment.start.as_secs_f64(),
                    e
                );
                ProviderCall::Failed
            }
        }
    }

    async fn enrich(&self, provider: &dyn RecognitionProvider, result: MatchResult) -> MatchResult {
        match tokio::time::timeout(self.request_timeout, provider.enrich(result.clone())).await {
            Ok(Ok(enriched)) => enriched,
            Ok(Err(e)) => {
                tracing::warn!("Enrichment failed for {}: {}", result.title, e);
                result
            }
            Err(_) => {
                tracing::warn!("Enrichment timed out for {}", result.title);
                result
            }
        }
    }
}

/// `provider|start|duration|content hash`
fn cache_key(provider: &str, segment: &AudioSegment, content_hash: &str) -> String {
    format!(
        "{}|{:.3}|{:.3}|{}",
        provider,
        segment.start.as_secs_f64(),
        segment.duration.as_secs_f64(),
        content_hash
    )
}

/// Build a manager for `ctx` and run it over `segments`.
pub async fn identify_tracks<S>(
    segments: S,
    ctx: PipelineContext,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<IdentificationReport, IdentificationError>
where
    S: Stream<Item = AudioSegment> + Send,
{
    IdentificationManager::new(ctx, config)?
        .identify_tracks(segments, cancel)
        .await
}
