//! Rate limiter metrics.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::circuit::CircuitState;

/// A period spent waiting for a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaitWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct RateLimitMetrics {
    pub total_requests: u64,
    pub rate_limited_requests: u64,
    pub total_wait_time: Duration,
    pub last_rate_limit_at: Option<DateTime<Utc>>,
    pub circuit_trips: u64,
    pub last_circuit_trip_at: Option<DateTime<Utc>>,
    windows: VecDeque<WaitWindow>,
    max_windows: usize,
}

impl RateLimitMetrics {
    pub fn new(max_windows: usize) -> Self {
        Self {
            total_requests: 0,
            rate_limited_requests: 0,
            total_wait_time: Duration::ZERO,
            last_rate_limit_at: None,
            circuit_trips: 0,
            last_circuit_trip_at: None,
            windows: VecDeque::new(),
            max_windows,
        }
    }

    /// Log a wait window, evicting the oldest once the log is full.
    pub fn record_window(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        if self.max_windows == 0 {
            return;
        }
        while self.windows.len() >= self.max_windows {
            self.windows.pop_front();
        }
        self.windows.push_back(WaitWindow { start, end });
        self.last_rate_limit_at = Some(end);
    }

    pub fn record_trip(&mut self, at: DateTime<Utc>) {
        self.circuit_trips += 1;
        self.last_circuit_trip_at = Some(at);
    }

    pub fn windows(&self) -> impl Iterator<Item = &WaitWindow> {
        self.windows.iter()
    }
}

/// Point-in-time view of one provider's limiter.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub provider: String,
    pub total_requests: u64,
    pub rate_limited_requests: u64,
    pub total_wait_time: Duration,
    pub last_rate_limit_at: Option<DateTime<Utc>>,
    pub circuit_trips: u64,
    pub last_circuit_trip_at: Option<DateTime<Utc>>,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub current_tokens: f64,
    pub in_flight: usize,
    pub max_requests_per_minute: u32,
    pub max_concurrent_requests: u32,
    pub wait_windows: Vec<WaitWindow>,
}
