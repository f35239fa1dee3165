//! Gimbal - Resilience substrate for multi-venue trading clients.
//!
//! This crate provides the fault-tolerance layer that sits between a
//! trading application and an exchange's REST and WebSocket surfaces:
//! rate limiting, circuit breaking, retries with backoff, and
//! self-healing streaming connections.
//!
//! # Architecture
//!
//! Components compose in a fixed order around each outbound request:
//!
//! - **[`limiter`]** - Token-bucket rate limiting with per-operation weights
//! - **[`breaker`]** - Three-state circuit breaker (closed / open / half-open)
//! - **[`retry`]** - Exponential backoff with jitter, gated on error class
//! - **[`composer`]** - Breaker-around-retry composition, bulkheads, timeouts
//! - **[`executor`]** - REST request pipeline threading all of the above
//! - **[`stream`]** - WebSocket client with heartbeat and auto-reconnect
//! - **[`nonce`]** - Monotonic nonce sequencing for signed requests
//!
//! # Modules
//!
//! - [`config`] - Configuration loading from TOML files with validation
//! - [`error`] - Error types for the crate
//! - [`logging`] - Tracing subscriber initialization
//!
//! # Features
//!
//! - `testkit` - Expose mock transports and scripted collaborators for
//!   integration tests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gimbal::breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use gimbal::composer::ResilientExecutor;
//! use gimbal::retry::RetryConfig;
//!
//! let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
//! let executor = ResilientExecutor::with_breaker(breaker, RetryConfig::default());
//! ```

pub mod breaker;
pub mod composer;
pub mod config;
pub mod error;
pub mod executor;
pub mod limiter;
pub mod logging;
pub mod nonce;
pub mod retry;
pub mod stream;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
