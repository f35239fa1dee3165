#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use gimbal::breaker::CircuitBreakerConfig;
use gimbal::error::Result;
use gimbal::executor::{ApiRequest, ApiResponse, HttpTransport};
use gimbal::retry::RetryConfig;
use gimbal::stream::StreamConfig;

/// Retry shape with millisecond delays so tests run fast.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Breaker that trips on `failure_threshold` consecutive failures with no
/// error-rate interference.
pub fn fast_breaker(failure_threshold: u32, reset_timeout_ms: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        success_threshold: 2,
        time_window_ms: 60_000,
        reset_timeout_ms,
        minimum_request_volume: failure_threshold as usize,
        error_rate_threshold: 1.0,
    }
}

/// Stream config with heartbeat off and near-zero reconnect delays.
pub fn fast_stream(max_reconnect_attempts: u32) -> StreamConfig {
    StreamConfig {
        heartbeat_enabled: false,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 1.0,
        jitter: false,
        max_reconnect_attempts,
        ..StreamConfig::default()
    }
}

/// An [`HttpTransport`] that replays a scripted queue of responses.
///
/// Exhausting the queue panics: a test that makes more calls than it
/// scripted has a bug.
pub struct ScriptedHttp {
    responses: Mutex<VecDeque<Result<ApiResponse>>>,
    calls: Arc<AtomicU32>,
    seen: Mutex<Vec<ApiRequest>>,
}

impl ScriptedHttp {
    pub fn new(responses: Vec<Result<ApiResponse>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: Arc::new(AtomicU32::new(0)),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<ApiRequest> {
        self.seen.lock().clone()
    }
}

pub fn ok_response(body: serde_json::Value) -> Result<ApiResponse> {
    Ok(ApiResponse { status: 200, body })
}

#[async_trait]
impl HttpTransport for ScriptedHttp {
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .expect("scripted transport exhausted")
    }
}
