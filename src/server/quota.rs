//! Per-client throughput quotas
//!
//! Token-bucket tracking keyed by client id. The first interval in which a
//! client exceeds its allowance is reported (`first_violation`) but not
//! slept for by the server; the computed delay rides back in the response so
//! clients can tell throttling from latency. Subsequent violations suspend
//! the request pipeline for the returned delay, applying backpressure.

use crate::config::{QuotaConfig, MAX_THROTTLE_DELAY_MS};
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Outcome of recording a request against a client's quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleResult {
    /// True on the first violating interval of a violation streak
    pub first_violation: bool,
    /// How long the client should back off; zero when within allowance
    pub delay: Duration,
}

impl ThrottleResult {
    /// A result carrying no throttle
    pub fn none() -> Self {
        Self {
            first_violation: false,
            delay: Duration::ZERO,
        }
    }

    /// Whether any throttle applies
    pub fn throttled(&self) -> bool {
        !self.delay.is_zero()
    }
}

/// One client's token bucket
#[derive(Debug)]
struct ClientBucket {
    /// Available tokens (bytes)
    tokens: f64,
    /// Last refill timestamp in ms since the manager epoch
    last_refill_ms: u64,
    /// Whether the previous check was already throttled
    in_violation: bool,
}

impl ClientBucket {
    fn new(capacity: u64, now_ms: u64) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill_ms: now_ms,
            in_violation: false,
        }
    }

    fn refill(&mut self, rate_per_ms: f64, capacity: u64, now_ms: u64) {
        if now_ms <= self.last_refill_ms {
            return;
        }
        let elapsed = (now_ms - self.last_refill_ms) as f64;
        self.tokens = (self.tokens + elapsed * rate_per_ms).min(capacity as f64);
        self.last_refill_ms = now_ms;
    }

    fn record(&mut self, bytes: u64, rate_per_ms: f64, capacity: u64, now_ms: u64) -> ThrottleResult {
        self.refill(rate_per_ms, capacity, now_ms);

        // The request is always charged; the bucket may go negative, which
        // extends the delay for the next offender.
        self.tokens -= bytes as f64;

        if self.tokens >= 0.0 {
            self.in_violation = false;
            return ThrottleResult::none();
        }

        let deficit = -self.tokens;
        let delay_ms = if rate_per_ms > 0.0 {
            ((deficit / rate_per_ms).ceil() as u64).min(MAX_THROTTLE_DELAY_MS)
        } else {
            MAX_THROTTLE_DELAY_MS
        };

        let first = !self.in_violation;
        self.in_violation = true;
        ThrottleResult {
            first_violation: first,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

/// Per-client-id quota manager
pub struct QuotaManager {
    config: QuotaConfig,
    buckets: DashMap<String, ClientBucket>,
    /// Reference instant for deriving monotonic milliseconds
    epoch: Instant,
}

impl QuotaManager {
    /// Create a manager with the given configuration
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn rate_per_ms(&self) -> f64 {
        self.config.byte_rate as f64 / 1000.0
    }

    /// Whether quotas are in effect
    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.byte_rate > 0
    }

    /// Record `bytes` against the client's bucket and compute any throttle
    ///
    /// Clients without an id share the anonymous bucket.
    pub fn record_and_throttle(&self, client_id: &str, bytes: usize) -> ThrottleResult {
        if !self.is_enabled() {
            return ThrottleResult::none();
        }
        let now = self.now_ms();
        self.record_at(client_id, bytes, now)
    }

    /// Number of tracked client buckets
    pub fn client_count(&self) -> usize {
        self.buckets.len()
    }

    // Time-parameterized core, used directly by tests.
    fn record_at(&self, client_id: &str, bytes: usize, now_ms: u64) -> ThrottleResult {
        let capacity = self.config.byte_rate;
        let rate = self.rate_per_ms();
        let mut bucket = self
            .buckets
            .entry(client_id.to_string())
            .or_insert_with(|| ClientBucket::new(capacity, now_ms));
        bucket.record(bytes as u64, rate, capacity, now_ms)
    }
}
