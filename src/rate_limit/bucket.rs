//! Token bucket with a rolling one-minute grant log.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

/// Continuous-refill token bucket.
///
/// Tokens refill at `rpm / 60` per second up to `rpm` and the bucket starts
/// full. Refill alone would let a full bucket plus a minute of refill through
/// in the first minute, so grants are also checked against a rolling 60 s
/// log: no window of 60 seconds ever sees more than `rpm` grants.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    grants: VecDeque<Instant>,
}

impl TokenBucket {
    pub fn new(requests_per_minute: u32, now: Instant) -> Self {
        let capacity = f64::from(requests_per_minute.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: now,
            grants: VecDeque::new(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        while let Some(&oldest) = self.grants.front() {
            if now.saturating_duration_since(oldest) >= WINDOW {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }

    /// Take one token if available.
    pub fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 && (self.grants.len() as f64) < self.capacity {
            self.tokens -= 1.0;
            self.grants.push_back(now);
            true
        } else {
            false
        }
    }

    /// Tokens available at `now`.
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_starts_full() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(3, now);
        assert!(bucket.try_take(now));
        assert!(bucket.try_take(now));
        assert!(bucket.try_take(now));
        assert!(!bucket.try_take(now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_continuously() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(60, start);
        while bucket.try_take(start) {}

        // One token per second at 60 rpm, but the rolling window is still full
        let later = start + Duration::from_secs(1);
        assert!((bucket.available(later) - 1.0).abs() < 1e-9);
        assert!(!bucket.try_take(later));

        let next_minute = start + WINDOW;
        assert!(bucket.try_take(next_minute));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_caps_refill() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(10, start);
        assert_eq!(bucket.available(start + Duration::from_secs(3600)), 10.0);
        assert_eq!(bucket.capacity(), 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rpm_treated_as_one() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(0, start);
        assert!(bucket.try_take(start));
        assert!(!bucket.try_take(start));
    }
}
