//! Per-provider admission control.
//!
//! Every provider gets its own concurrency slots, token bucket and circuit
//! breaker. Callers `acquire` before calling a provider, `release` when the
//! call returns and `report_result` with the outcome. The manager uses the
//! RAII [`AdmissionPermit`] so release can never be forgotten.
//!
//! State for different providers never shares a lock on the hot path; the
//! provider table is only write-locked when a provider is first seen.

mod bucket;
mod circuit;
mod metrics;

pub use bucket::TokenBucket;
pub use circuit::{Admission, CircuitBreaker, CircuitState};
pub use metrics::{MetricsSnapshot, WaitWindow};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use metrics::RateLimitMetrics;

use crate::config::secs_to_duration;

/// Stand-in deadline for timeouts too long to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// How often a waiting caller re-checks the token bucket.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Token waits at least this long count as rate-limited.
const RATE_LIMIT_DETECTION_THRESHOLD: Duration = Duration::from_millis(1);

/// Callback fired when a circuit opens.
pub type AlertCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Limits for a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderLimitsConfig {
    pub max_requests_per_minute: u32,
    pub max_concurrent_requests: u32,
}

impl ProviderLimitsConfig {
    pub const fn new(max_requests_per_minute: u32, max_concurrent_requests: u32) -> Self {
        Self {
            max_requests_per_minute,
            max_concurrent_requests,
        }
    }
}

/// Published quotas of known providers.
pub fn builtin_limits(provider: &str) -> Option<ProviderLimitsConfig> {
    match provider {
        "acrcloud" => Some(ProviderLimitsConfig::new(300, 10)),
        "acoustid" => Some(ProviderLimitsConfig::new(180, 3)),
        _ => None,
    }
}

/// Rate limit section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Disable to skip token checks (concurrency and circuit still apply)
    pub enabled: bool,
    pub circuit_breaker_enabled: bool,
    /// Consecutive failures that open a circuit
    pub circuit_breaker_threshold: u32,
    /// Seconds an open circuit waits before allowing a probe
    pub circuit_breaker_reset_timeout_secs: f64,
    /// Default wait budget for `acquire`
    pub acquire_timeout_secs: f64,
    /// Limits for providers without an override or built-in quota
    pub max_requests_per_minute: u32,
    pub max_concurrent_requests: u32,
    /// Size of each provider's wait window log
    pub max_wait_windows: usize,
    /// Per-provider overrides
    pub providers: HashMap<String, ProviderLimitsConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            circuit_breaker_enabled: true,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_timeout_secs: 60.0,
            acquire_timeout_secs: 30.0,
            max_requests_per_minute: 25,
            max_concurrent_requests: 2,
            max_wait_windows: 1000,
            providers: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// Limits for `provider`: override, then built-in quota, then defaults.
    pub fn limits_for(&self, provider: &str) -> ProviderLimitsConfig {
        self.providers
            .get(provider)
            .copied()
            .or_else(|| builtin_limits(provider))
            .unwrap_or(ProviderLimitsConfig::new(
                self.max_requests_per_minute,
                self.max_concurrent_requests,
            ))
    }

    pub fn reset_timeout(&self) -> Duration {
        secs_to_duration(self.circuit_breaker_reset_timeout_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        secs_to_duration(self.acquire_timeout_secs)
    }
}

struct ProviderState {
    bucket: TokenBucket,
    circuit: CircuitBreaker,
    metrics: RateLimitMetrics,
    in_flight: usize,
}

/// Limiter state for one provider.
struct ProviderLimits {
    name: String,
    limits: ProviderLimitsConfig,
    slots: Semaphore,
    state: Mutex<ProviderState>,
}

impl ProviderLimits {
    fn new(name: &str, limits: ProviderLimitsConfig, max_windows: usize) -> Self {
        let concurrency = limits.max_concurrent_requests.max(1) as usize;
        Self {
            name: name.to_string(),
            limits,
            slots: Semaphore::new(concurrency),
            state: Mutex::new(ProviderState {
                bucket: TokenBucket::new(limits.max_requests_per_minute, Instant::now()),
                circuit: CircuitBreaker::default(),
                metrics: RateLimitMetrics::new(max_windows),
                in_flight: 0,
            }),
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        if state.in_flight == 0 {
            tracing::debug!("Release for {} without an outstanding slot", self.name);
            return;
        }
        state.in_flight -= 1;
        self.slots.add_permits(1);
    }
}

/// Holds one admitted slot. Dropping it releases the slot.
#[must_use = "dropping the permit releases the slot immediately"]
pub struct AdmissionPermit {
    limits: Arc<ProviderLimits>,
    probe: bool,
}

impl AdmissionPermit {
    pub fn provider(&self) -> &str {
        &self.limits.name
    }

    /// Whether this permit carries the half-open circuit's single probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Give the slot back without calling the provider. A probe is handed
    /// back too, so the next caller can take it straight away.
    pub fn abandon(self) {
        if self.probe {
            self.limits.state.lock().circuit.abandon_probe();
        }
    }
}

/// Hands an admitted probe back if admission is dropped or fails before a
/// permit exists.
struct ProbeGuard<'a> {
    limits: &'a ProviderLimits,
    armed: bool,
}

impl ProbeGuard<'_> {
    fn disarm(mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.limits.state.lock().circuit.abandon_probe();
        }
    }
}

/// Frees a taken slot unless it is handed over to a permit.
struct SlotGuard<'a> {
    limits: &'a ProviderLimits,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.limits.release();
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.limits.release();
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("provider", &self.limits.name)
            .finish()
    }
}

/// Admission control for all providers.
pub struct RateLimiter {
    config: RateLimitConfig,
    providers: RwLock<HashMap<String, Arc<ProviderLimits>>>,
    alerts: RwLock<Vec<AlertCallback>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("providers", &self.providers.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            providers: RwLock::new(HashMap::new()),
            alerts: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Register (or replace) explicit limits for a provider.
    pub fn register_provider(&self, provider: &str, limits: ProviderLimitsConfig) {
        let state = Arc::new(ProviderLimits::new(provider, limits, self.config.max_wait_windows));
        self.providers.write().insert(provider.to_string(), state);
        tracing::debug!(
            "Registered rate limits for {}: {} rpm, {} concurrent",
            provider,
            limits.max_requests_per_minute,
            limits.max_concurrent_requests
        );
    }

    pub fn register_alert_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.alerts.write().push(Arc::new(callback));
    }

    fn limits_for(&self, provider: &str) -> Arc<ProviderLimits> {
        if let Some(limits) = self.providers.read().get(provider) {
            return Arc::clone(limits);
        }
        let mut providers = self.providers.write();
        let limits = providers.entry(provider.to_string()).or_insert_with(|| {
            Arc::new(ProviderLimits::new(
                provider,
                self.config.limits_for(provider),
                self.config.max_wait_windows,
            ))
        });
        Arc::clone(limits)
    }

    /// Wait up to `timeout` for admission to call `provider`.
    ///
    /// A grant holds one concurrency slot that must be freed with
    /// [`RateLimiter::release`]. Prefer [`RateLimiter::acquire_permit`].
    pub async fn acquire(&self, provider: &str, timeout: Duration) -> bool {
        self.acquire_permit(provider, timeout)
            .await
            .map(std::mem::forget)
            .is_some()
    }

    /// Wait up to `timeout` for admission; the slot is released when the
    /// returned permit is dropped.
    ///
    /// Cancel-safe: dropping the future mid-wait frees any slot taken and
    /// hands back a half-open probe.
    pub async fn acquire_permit(
        &self,
        provider: &str,
        timeout: Duration,
    ) -> Option<AdmissionPermit> {
        let limits = self.limits_for(provider);
        let now = Instant::now();
        // A saturated timeout means wait indefinitely
        let deadline = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);

        let probe = if self.config.circuit_breaker_enabled {
            let admission = limits
                .state
                .lock()
                .circuit
                .admit(Instant::now(), self.config.reset_timeout());
            match admission {
                Admission::Denied => {
                    tracing::debug!("Circuit open for {}, request denied", provider);
                    return None;
                }
                Admission::Probe => true,
                Admission::Allowed => false,
            }
        } else {
            false
        };

        let probe = ProbeGuard {
            limits: &limits,
            armed: probe,
        };
        limits.state.lock().metrics.total_requests += 1;

        let slot_wait = Instant::now();
        match tokio::time::timeout_at(deadline, limits.slots.acquire()).await {
            Ok(Ok(permit)) => permit.forget(),
            _ => {
                tracing::debug!("No concurrency slot for {} within {:?}", provider, timeout);
                return None;
            }
        }
        let slot = SlotGuard { limits: &limits };
        {
            let mut state = limits.state.lock();
            state.in_flight += 1;
            state.metrics.total_wait_time += slot_wait.elapsed();
        }

        if !self.config.enabled {
            std::mem::forget(slot);
            return Some(AdmissionPermit {
                limits: Arc::clone(&limits),
                probe: probe.disarm(),
            });
        }

        let poll_start = Instant::now();
        let poll_start_wall = Utc::now();
        loop {
            {
                let mut state = limits.state.lock();
                if state.bucket.try_take(Instant::now()) {
                    let waited = poll_start.elapsed();
                    if waited >= RATE_LIMIT_DETECTION_THRESHOLD {
                        state.metrics.rate_limited_requests += 1;
                        state.metrics.total_wait_time += waited;
                        state.metrics.record_window(poll_start_wall, Utc::now());
                        tracing::debug!(
                            "Rate limited on {}: waited {:.3}s for a token",
                            provider,
                            waited.as_secs_f64()
                        );
                    }
                    drop(state);
                    std::mem::forget(slot);
                    return Some(AdmissionPermit {
                        limits: Arc::clone(&limits),
                        probe: probe.disarm(),
                    });
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())))
                .await;
        }

        limits
            .state
            .lock()
            .metrics
            .record_window(poll_start_wall, Utc::now());
        tracing::warn!("Rate limit timeout for {} after {:?}", provider, timeout);
        None
    }

    /// Free a slot taken by [`RateLimiter::acquire`].
    pub fn release(&self, provider: &str) {
        if let Some(limits) = self.providers.read().get(provider) {
            limits.release();
        }
    }

    /// Feed a call outcome into the provider's circuit breaker.
    pub fn report_result(&self, provider: &str, success: bool) {
        if !self.config.circuit_breaker_enabled {
            return;
        }
        let limits = self.limits_for(provider);

        let alert = {
            let mut state = limits.state.lock();
            if success {
                state.circuit.record_success();
                None
            } else {
                let failures = state.circuit.consecutive_failures() + 1;
                if state
                    .circuit
                    .record_failure(Instant::now(), self.config.circuit_breaker_threshold)
                {
                    state.metrics.record_trip(Utc::now());
                    Some(format!(
                        "Circuit breaker opened for provider {provider} after {failures} consecutive failures"
                    ))
                } else {
                    None
                }
            }
        };

        if let Some(message) = alert {
            tracing::warn!("{}", message);
            self.send_alert(&message);
        }
    }

    fn send_alert(&self, message: &str) {
        let callbacks: Vec<AlertCallback> = self.alerts.read().clone();
        for callback in callbacks {
            callback(message);
        }
    }

    /// Snapshot of a provider's limiter, if it has been used.
    pub fn metrics(&self, provider: &str) -> Option<MetricsSnapshot> {
        let limits = Arc::clone(self.providers.read().get(provider)?);
        let mut state = limits.state.lock();
        let current_tokens = state.bucket.available(Instant::now());
        Some(MetricsSnapshot {
            provider: provider.to_string(),
            total_requests: state.metrics.total_requests,
            rate_limited_requests: state.metrics.rate_limited_requests,
            total_wait_time: state.metrics.total_wait_time,
            last_rate_limit_at: state.metrics.last_rate_limit_at,
            circuit_trips: state.metrics.circuit_trips,
            last_circuit_trip_at: state.metrics.last_circuit_trip_at,
            circuit_state: state.circuit.state(),
            consecutive_failures: state.circuit.consecutive_failures(),
            current_tokens,
            in_flight: state.in_flight,
            max_requests_per_minute: limits.limits.max_requests_per_minute,
            max_concurrent_requests: limits.limits.max_concurrent_requests,
            wait_windows: state.metrics.windows().copied().collect(),
        })
    }

    /// Names of every provider the limiter has seen.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().keys().cloned().collect();
        names.sort();
        names
    }
}
