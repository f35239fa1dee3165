//! Circuit breaker for upstream calls.
//!
//! A three-state gate (closed / open / half-open) shared by every caller
//! targeting the same upstream. Trip decisions combine a consecutive-failure
//! count with an error-rate check over a rolling time window; an open
//! circuit fast-fails without touching the upstream, and recovery goes
//! through a half-open trial where a single failure re-opens immediately.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Breaker state as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// All calls pass through.
    Closed,
    /// Calls are rejected without reaching the upstream.
    Open,
    /// Trial state: calls pass through, one failure re-opens.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        write!(f, "{s}")
    }
}

/// A state transition notification.
///
/// Purely observational; nothing in the breaker's control flow depends on
/// whether anyone is subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Successes required in half-open before closing.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Rolling window for the request log (milliseconds).
    #[serde(default = "default_time_window_ms")]
    pub time_window_ms: u64,
    /// Time spent open before the next call may probe (milliseconds).
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    /// Minimum requests in the window before thresholds apply.
    #[serde(default = "default_minimum_request_volume")]
    pub minimum_request_volume: usize,
    /// Error rate (failures / total in window, 0..=1) that trips the breaker.
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_time_window_ms() -> u64 {
    60_000
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_minimum_request_volume() -> usize {
    5
}

fn default_error_rate_threshold() -> f64 {
    0.5
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            time_window_ms: default_time_window_ms(),
            reset_timeout_ms: default_reset_timeout_ms(),
            minimum_request_volume: default_minimum_request_volume(),
            error_rate_threshold: default_error_rate_threshold(),
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    /// Rolling (timestamp, success) log, pruned to the window on every
    /// evaluation so it never grows unbounded.
    request_log: VecDeque<(Instant, bool)>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    last_transition: Instant,
}

impl CircuitInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            request_log: VecDeque::new(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            last_transition: Instant::now(),
        }
    }

    fn prune(&mut self, window: Duration) {
        let cutoff = Instant::now() - window;
        while let Some(&(at, _)) = self.request_log.front() {
            if at < cutoff {
                self.request_log.pop_front();
            } else {
                break;
            }
        }
    }

    fn failures_in_window(&self) -> usize {
        self.request_log.iter().filter(|(_, ok)| !ok).count()
    }

    fn error_rate(&self) -> f64 {
        if self.request_log.is_empty() {
            return 0.0;
        }
        self.failures_in_window() as f64 / self.request_log.len() as f64
    }
}

/// Point-in-time breaker snapshot for metrics collectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub requests_in_window: usize,
    pub failures_in_window: usize,
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

/// Thread-safe circuit breaker.
///
/// Admission checks and outcome recording are synchronous; only the wrapped
/// operation itself suspends.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
    transitions: broadcast::Sender<Transition>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let (transitions, _) = broadcast::channel(16);
        Self {
            config,
            inner: Mutex::new(CircuitInner::new()),
            transitions,
        }
    }

    /// Subscribe to state-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Run `operation` through the breaker.
    ///
    /// Rejects with [`Error::CircuitOpen`] without invoking the operation
    /// when the circuit is open; otherwise invokes it, records the outcome,
    /// and propagates the result unchanged.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(retry_in) = self.check_admission() {
            return Err(Error::CircuitOpen { retry_in });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Whether a call would currently be admitted.
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open
    /// here, in place of a one-shot timer.
    pub fn can_execute(&self) -> bool {
        self.check_admission().is_none()
    }

    /// Returns the remaining open time when the call must be rejected.
    fn check_admission(&self) -> Option<Duration> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => None,
            CircuitState::Open => {
                let reset_timeout = Duration::from_millis(self.config.reset_timeout_ms);
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(reset_timeout);

                if elapsed >= reset_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.consecutive_successes = 0;
                    None
                } else {
                    Some(reset_timeout - elapsed)
                }
            }
        }
    }

    /// Record a successful outcome.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.request_log.push_back((Instant::now(), true));
        inner.prune(Duration::from_millis(self.config.time_window_ms));
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= self.config.success_threshold {
                self.transition(&mut inner, CircuitState::Closed);
                inner.request_log.clear();
                inner.consecutive_successes = 0;
                inner.opened_at = None;
            }
        }
    }

    /// Record a failed outcome and evaluate trip conditions.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.request_log.push_back((Instant::now(), false));
        inner.prune(Duration::from_millis(self.config.time_window_ms));
        inner.consecutive_successes = 0;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.state {
            // Single strike: any half-open failure re-opens immediately.
            CircuitState::HalfOpen => self.open(&mut inner),
            CircuitState::Closed => {
                let volume_met = inner.request_log.len() >= self.config.minimum_request_volume;
                let tripped = inner.consecutive_failures >= self.config.failure_threshold
                    || inner.error_rate() >= self.config.error_rate_threshold;
                if volume_met && tripped {
                    warn!(
                        consecutive_failures = inner.consecutive_failures,
                        error_rate = inner.error_rate(),
                        "Circuit breaker tripped"
                    );
                    self.open(&mut inner);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Operational override: force the breaker open.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.open(&mut inner);
    }

    /// Operational override: force the breaker closed and reset counters.
    pub fn force_closed(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.request_log.clear();
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let mut inner = self.inner.lock();
        inner.prune(Duration::from_millis(self.config.time_window_ms));
        CircuitMetrics {
            state: inner.state,
            requests_in_window: inner.request_log.len(),
            failures_in_window: inner.failures_in_window(),
            error_rate: inner.error_rate(),
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
        }
    }

    fn open(&self, inner: &mut CircuitInner) {
        self.transition(inner, CircuitState::Open);
        inner.opened_at = Some(Instant::now());
    }

    fn transition(&self, inner: &mut CircuitInner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        inner.last_transition = Instant::now();
        info!(%from, %to, "Circuit breaker state change");
        let _ = self.transitions.send(Transition { from, to });
    }
}
