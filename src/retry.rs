//! Exponential-backoff retry policy.
//!
//! Pure backoff: no knowledge of circuits or rate limiting. Composition with
//! those lives in [`crate::composer`].

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Retry budget and backoff shape. Stateless; every call is independent.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first (>= 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on any single delay (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied per attempt (>= 1).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Perturb each delay by ±25% to avoid synchronized retry storms.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Backoff delay after the `attempt`-th failure (1-based), before jitter.
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let raw = (self.base_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(raw as u64)
    }

    pub(crate) fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.75..=1.25);
        // The cap is a hard bound; upward jitter must not breach it.
        delay
            .mul_f64(factor)
            .min(Duration::from_millis(self.max_delay_ms))
    }
}

/// Retry `operation` with the default classifier, [`Error::is_retryable`].
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(config, Error::is_retryable, operation).await
}

/// Retry `operation`, consulting `predicate` after each failure.
///
/// Non-retryable errors propagate immediately without consuming budget.
/// When the budget is exhausted the last error is wrapped as
/// [`Error::MaxRetriesExceeded`]. An authoritative `retry_after` hint on
/// the error overrides the computed backoff delay.
pub async fn with_retry_if<F, Fut, T, P>(
    config: &RetryConfig,
    predicate: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !predicate(&err) {
                    return Err(err);
                }
                if attempt == max_attempts {
                    warn!(attempts = max_attempts, error = %err, "Retry budget exhausted");
                    return Err(Error::MaxRetriesExceeded {
                        attempts: max_attempts,
                        source: Box::new(err),
                    });
                }

                let delay = match err.retry_after() {
                    Some(hint) => hint,
                    None => config.jittered(config.delay_for_attempt(attempt)),
                };
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("retry loop returns on the final attempt")
}
