//! Per-provider circuit breaker state machine.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Outcome of asking the breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, proceed normally
    Allowed,
    /// Circuit half-open, this caller is the single probe
    Probe,
    /// Circuit open (or probe already outstanding)
    Denied,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    opened_at: Option<Instant>,
    consecutive_failures: u32,
    probe_started_at: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            consecutive_failures: 0,
            probe_started_at: None,
        }
    }
}

impl CircuitBreaker {
    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Decide whether a call may proceed, moving Open → HalfOpen once the
    /// reset timeout has elapsed.
    ///
    /// A probe that never reports back is forgotten after another reset
    /// timeout so the breaker cannot wedge in HalfOpen.
    pub fn admit(&mut self, now: Instant, reset_timeout: Duration) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);
                if elapsed > reset_timeout {
                    tracing::info!("Circuit half-open after {:.1}s", elapsed.as_secs_f64());
                    self.state = CircuitState::HalfOpen;
                    self.probe_started_at = Some(now);
                    Admission::Probe
                } else {
                    Admission::Denied
                }
            }
            CircuitState::HalfOpen => match self.probe_started_at {
                Some(started) if now.saturating_duration_since(started) <= reset_timeout => {
                    Admission::Denied
                }
                _ => {
                    self.probe_started_at = Some(now);
                    Admission::Probe
                }
            },
        }
    }

    /// The probe was admitted by the breaker but never reached the provider.
    pub fn abandon_probe(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.probe_started_at = None;
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        if self.state == CircuitState::HalfOpen {
            tracing::info!("Circuit closed after successful probe");
            self.state = CircuitState::Closed;
            self.opened_at = None;
            self.probe_started_at = None;
        }
    }

    /// Record a failure. Returns true if this failure opened the circuit.
    pub fn record_failure(&mut self, now: Instant, threshold: u32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            CircuitState::Closed if self.consecutive_failures >= threshold => {
                self.open(now);
                true
            }
            CircuitState::HalfOpen => {
                self.open(now);
                true
            }
            _ => false,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESET: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_trips_at_threshold() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::default();

        assert!(!breaker.record_failure(now, 3));
        assert!(!breaker.record_failure(now, 3));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.record_failure(now, 3));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.admit(now, RESET), Admission::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failures() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::default();
        breaker.record_failure(now, 2);
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(!breaker.record_failure(now, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_in_half_open() {
        let start = Instant::now();
        let mut breaker = CircuitBreaker::default();
        breaker.record_failure(start, 1);

        let later = start + RESET + Duration::from_millis(1);
        assert_eq!(breaker.admit(later, RESET), Admission::Probe);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.admit(later, RESET), Admission::Denied);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.admit(later, RESET), Admission::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let start = Instant::now();
        let mut breaker = CircuitBreaker::default();
        breaker.record_failure(start, 1);

        let later = start + RESET * 2;
        assert_eq!(breaker.admit(later, RESET), Admission::Probe);
        assert!(breaker.record_failure(later, 1));
        assert_eq!(breaker.state(), CircuitState::Open);
        // Timeout restarts from the failed probe
        assert_eq!(breaker.admit(later + RESET / 2, RESET), Admission::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_frees_slot() {
        let start = Instant::now();
        let mut breaker = CircuitBreaker::default();
        breaker.record_failure(start, 1);

        let later = start + RESET * 2;
        assert_eq!(breaker.admit(later, RESET), Admission::Probe);
        breaker.abandon_probe();
        assert_eq!(breaker.admit(later, RESET), Admission::Probe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_probe_expires() {
        let start = Instant::now();
        let mut breaker = CircuitBreaker::default();
        breaker.record_failure(start, 1);

        let probe_at = start + RESET * 2;
        assert_eq!(breaker.admit(probe_at, RESET), Admission::Probe);
        assert_eq!(
            breaker.admit(probe_at + RESET + Duration::from_secs(1), RESET),
            Admission::Probe
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"half_open\""
        );
    }
}
