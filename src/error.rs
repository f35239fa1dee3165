use std::time::Duration;

use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// The closed error taxonomy surfaced by this crate.
///
/// Callers receive either a typed success value or one of these variants;
/// raw transport errors (socket failures, bare HTTP errors) are always
/// translated at the boundary and never propagate as-is.
#[derive(Error, Debug)]
pub enum Error {
    /// The circuit breaker is open; the call was rejected without reaching
    /// the upstream. Back off instead of retrying immediately.
    #[error("circuit open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    /// The upstream (or local limiter) signaled rate-limit exhaustion.
    /// May carry an authoritative `Retry-After` hint.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// The operation did not complete within the allotted duration. The
    /// underlying operation may still be running; only its result is
    /// discarded.
    #[error("operation timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Retry budget exhausted. Wraps the last underlying error.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// A streaming or HTTP connection was lost mid-flight.
    #[error("connection dropped: {0}")]
    ConnectionDropped(String),

    /// Both the primary path and the fallback failed.
    #[error("fallback failed: {fallback} (primary: {primary})")]
    FallbackFailed {
        primary: Box<Error>,
        #[source]
        fallback: Box<Error>,
    },

    /// Bulkhead concurrency cap and queue are both full.
    #[error("bulkhead full: {in_flight} in flight, {queued} queued")]
    BulkheadFull { in_flight: usize, queued: usize },

    /// The upstream is unavailable (5xx-equivalent). Retryable.
    #[error("upstream unavailable (status {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// Authentication or authorization failure. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The request was malformed or rejected as invalid. Never retried.
    #[error("invalid request (status {status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Default retry classification: the fixed allow-list of transient
    /// failure kinds. Everything else propagates on first occurrence.
    ///
    /// `CircuitOpen` is deliberately not retryable; retrying a fast-fail
    /// defeats the breaker.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. } | Error::ConnectionDropped(_) | Error::Unavailable { .. }
        )
    }

    /// Authoritative backoff hint carried by rate-limit responses, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
