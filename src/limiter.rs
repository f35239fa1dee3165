//! Weighted token-bucket rate limiter.
//!
//! One limiter instance is shared by every caller targeting the same
//! upstream. Refill is lazy: tokens are recomputed from elapsed time on each
//! `acquire`, so there is no background timer. The limiter never rejects; a
//! caller short on tokens suspends until enough have refilled.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::trace;

/// Token bucket sizing and per-operation weights.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum tokens the bucket holds.
    #[serde(default = "default_capacity")]
    pub capacity: f64,
    /// Tokens restored per second.
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
    /// Cost charged for operations absent from the weight table.
    #[serde(default = "default_cost")]
    pub default_cost: u32,
    /// Per-operation token costs.
    #[serde(default)]
    pub weights: HashMap<String, u32>,
}

fn default_capacity() -> f64 {
    10.0
}

fn default_refill_per_sec() -> f64 {
    5.0
}

fn default_cost() -> u32 {
    1
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_sec: default_refill_per_sec(),
            default_cost: default_cost(),
            weights: HashMap::new(),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Point-in-time limiter snapshot for metrics collectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterMetrics {
    pub tokens: f64,
    pub capacity: f64,
}

/// Thread-safe weighted token bucket.
///
/// The mutex only guards the token accounting; waiting for refill happens
/// outside the lock so a starved caller never blocks others.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let tokens = config.capacity;
        Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Acquire tokens for `operation`, suspending until the weighted cost is
    /// available. Unknown operations fall back to the default cost.
    pub async fn acquire(&self, operation: &str) {
        let weight = self
            .config
            .weights
            .get(operation)
            .copied()
            .unwrap_or(self.config.default_cost);
        self.acquire_weight(weight).await;
    }

    /// Acquire an explicit token cost, suspending until it is available.
    pub async fn acquire_weight(&self, weight: u32) {
        // Costs above capacity would never be satisfiable; clamp so the
        // caller waits for a full bucket instead of hanging forever.
        let cost = f64::from(weight).min(self.config.capacity);

        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                self.refill(&mut bucket);

                if bucket.tokens >= cost {
                    bucket.tokens -= cost;
                    return;
                }

                let deficit = cost - bucket.tokens;
                Duration::from_secs_f64(deficit / self.config.refill_per_sec)
            };

            trace!(wait_ms = wait.as_millis() as u64, "rate limiter waiting for refill");
            tokio::time::sleep(wait).await;
            // Re-evaluate: a concurrent caller may have debited the refill
            // we waited for, in which case we wait again.
        }
    }

    /// Current token level, after applying lazy refill.
    pub fn metrics(&self) -> RateLimiterMetrics {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        RateLimiterMetrics {
            tokens: bucket.tokens,
            capacity: self.config.capacity,
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.config.refill_per_sec)
            .min(self.config.capacity);
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: f64, refill_per_sec: f64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            capacity,
            refill_per_sec,
            default_cost: 1,
            weights: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn fast_path_does_not_wait() {
        let limiter = limiter(5.0, 1.0);

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire("quote").await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn tokens_never_exceed_capacity() {
        let limiter = limiter(3.0, 1000.0);

        // Drain, then let the bucket refill well past capacity-worth of time.
        for _ in 0..3 {
            limiter.acquire("op").await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let metrics = limiter.metrics();
        assert!(metrics.tokens <= metrics.capacity);
    }

    #[tokio::test]
    async fn drained_bucket_suspends_until_refill() {
        // 2 tokens, 100/sec refill: third acquire must wait ~10ms.
        let limiter = limiter(2.0, 100.0);

        limiter.acquire("op").await;
        limiter.acquire("op").await;

        let start = Instant::now();
        limiter.acquire("op").await;
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn weight_table_overrides_default_cost() {
        let mut weights = HashMap::new();
        weights.insert("place_order".to_string(), 4);
        let limiter = RateLimiter::new(RateLimiterConfig {
            capacity: 4.0,
            refill_per_sec: 1.0,
            default_cost: 1,
            weights,
        });

        limiter.acquire("place_order").await;
        let metrics = limiter.metrics();
        assert!(metrics.tokens < 1.0, "weighted acquire should drain bucket");
    }

    #[tokio::test]
    async fn unknown_operation_uses_default_cost() {
        let limiter = limiter(4.0, 1.0);

        limiter.acquire("never_configured").await;
        let metrics = limiter.metrics();
        assert!(metrics.tokens > 2.5, "default cost should debit one token");
    }

    #[tokio::test]
    async fn tokens_never_negative_after_debit() {
        let limiter = limiter(1.0, 50.0);

        for _ in 0..4 {
            limiter.acquire("op").await;
            assert!(limiter.metrics().tokens >= 0.0);
        }
    }

    #[tokio::test]
    async fn oversized_weight_clamps_to_capacity() {
        let limiter = limiter(2.0, 100.0);

        // Would otherwise never be satisfiable.
        limiter.acquire_weight(10).await;
        assert!(limiter.metrics().tokens >= 0.0);
    }
}
