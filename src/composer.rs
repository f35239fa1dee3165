//! Composition of resilience layers around a single operation.
//!
//! [`ResilientExecutor`] fixes the composition order the rest of the crate
//! relies on: circuit breaker outermost, retry inside it. An open circuit
//! therefore short-circuits before any backoff delay is spent, and the
//! breaker's own rejection is never fed back into the retry loop.
//! [`Bulkhead`] and [`with_timeout`] are independent decorators that compose
//! orthogonally with it.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, Transition};
use crate::error::{Error, Result};
use crate::retry::{with_retry, RetryConfig};

/// Circuit-gated, retried execution of an arbitrary async operation.
///
/// One executor per logical upstream target; it owns the breaker, so every
/// call through the same executor shares failure history.
pub struct ResilientExecutor {
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
}

impl ResilientExecutor {
    pub fn new(circuit: CircuitBreakerConfig, retry: RetryConfig) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::new(circuit)),
            retry,
        }
    }

    /// Share an existing breaker (e.g. one breaker gating several call
    /// shapes against the same venue).
    pub fn with_breaker(breaker: Arc<CircuitBreaker>, retry: RetryConfig) -> Self {
        Self { breaker, retry }
    }

    /// The underlying breaker, for metrics and operational overrides.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Subscribe to breaker state changes.
    pub fn subscribe_transitions(&self) -> tokio::sync::broadcast::Receiver<Transition> {
        self.breaker.subscribe()
    }

    pub fn circuit_metrics(&self) -> CircuitMetrics {
        self.breaker.metrics()
    }

    /// Run `operation` through breaker (outer) and retry (inner).
    ///
    /// The breaker records one outcome per composed call: a call whose
    /// retries all fail counts as a single failure.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.breaker
            .execute(|| with_retry(&self.retry, operation))
            .await
    }

    /// Like [`call`](Self::call), but invokes `fallback` with the triggering
    /// error when the primary path is exhausted: the circuit is open or the
    /// retry budget ran out. Terminal first-strike errors (auth, malformed
    /// request) propagate untouched; a fallback must not mask them.
    ///
    /// A fallback failure surfaces as [`Error::FallbackFailed`] so callers
    /// can distinguish it from a primary-path failure.
    pub async fn call_or<F, Fut, T, FB, FbFut>(&self, operation: F, fallback: FB) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        FB: FnOnce(&Error) -> FbFut,
        FbFut: Future<Output = Result<T>>,
    {
        match self.call(operation).await {
            Ok(value) => Ok(value),
            Err(primary) => {
                if !matches!(
                    primary,
                    Error::CircuitOpen { .. } | Error::MaxRetriesExceeded { .. }
                ) {
                    return Err(primary);
                }
                warn!(error = %primary, "Primary path exhausted, invoking fallback");
                match fallback(&primary).await {
                    Ok(value) => Ok(value),
                    Err(fb_err) => Err(Error::FallbackFailed {
                        primary: Box::new(primary),
                        fallback: Box::new(fb_err),
                    }),
                }
            }
        }
    }
}

/// Concurrency cap isolating one operation's resource usage from others.
///
/// At most `max_concurrent` operations run at once; excess callers queue
/// FIFO up to `max_queue` and are rejected with [`Error::BulkheadFull`]
/// beyond that. Queued callers are released strictly in arrival order
/// (tokio's semaphore is fair).
pub struct Bulkhead {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    max_queue: Option<usize>,
    queued: AtomicUsize,
}

impl Bulkhead {
    pub fn new(max_concurrent: usize, max_queue: Option<usize>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_queue,
            queued: AtomicUsize::new(0),
        }
    }

    /// Run `operation` under the concurrency cap, queueing if necessary.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = match self.permits.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                // No slot free: join the queue if there is room.
                let queued = self.queued.fetch_add(1, Ordering::SeqCst);
                if let Some(max_queue) = self.max_queue {
                    if queued >= max_queue {
                        self.queued.fetch_sub(1, Ordering::SeqCst);
                        return Err(Error::BulkheadFull {
                            in_flight: self.max_concurrent,
                            queued,
                        });
                    }
                }
                let permit = self.permits.acquire().await;
                self.queued.fetch_sub(1, Ordering::SeqCst);
                permit.expect("bulkhead semaphore is never closed")
            }
        };

        operation().await
    }

    /// Callers currently waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Race `operation` against a timer.
///
/// If the timer fires first the operation's eventual result is discarded
/// and [`Error::Timeout`] is raised. The operation's future is dropped, but
/// any work it delegated elsewhere is not cancelled; wrapped operations
/// must tolerate their result being ignored.
pub async fn with_timeout<Fut, T>(duration: Duration, operation: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, operation).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout { elapsed: duration }),
    }
}
