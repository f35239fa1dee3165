//! HTTP request execution: rate-limit admission, resilient dispatch, and
//! translation of raw transport failures into the crate's error taxonomy.
//!
//! Venue adapters build an [`ApiRequest`], hand it to a [`RequestExecutor`],
//! and get back a typed [`ApiResponse`] or a classified [`Error`]. They
//! never see a bare `reqwest` or socket error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::composer::ResilientExecutor;
use crate::error::{Error, Result};
use crate::limiter::RateLimiter;

/// HTTP method subset used by venue REST APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// A venue-agnostic REST request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the transport's base URL, e.g. `/orders`.
    pub path: String,
    /// JSON body for state-changing calls.
    pub body: Option<serde_json::Value>,
    /// Rate-limit weight key; also used as the log label.
    pub operation: String,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
            operation: operation.into(),
        }
    }

    pub fn post(
        path: impl Into<String>,
        operation: impl Into<String>,
        body: impl Serialize,
    ) -> Result<Self> {
        Ok(Self {
            method: Method::Post,
            path: path.into(),
            body: Some(serde_json::to_value(body)?),
            operation: operation.into(),
        })
    }
}

/// A typed REST response with the body already decoded.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// The wire seam: collaborators supply a transport returning a typed result
/// or a classified error.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// `reqwest`-backed transport for a single venue base URL.
pub struct RestTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl RestTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| Error::Config(
            crate::error::ConfigError::InvalidValue {
                field: "base_url",
                reason: e.to_string(),
            },
        ))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    pub fn with_client(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn translate(err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                elapsed: Duration::ZERO,
            }
        } else if err.is_connect() {
            Error::ConnectionDropped(err.to_string())
        } else {
            Error::Unavailable {
                status: 0,
                message: err.to_string(),
            }
        }
    }

    fn classify_status(status: u16, message: String, retry_after: Option<Duration>) -> Error {
        match status {
            429 => Error::RateLimited { retry_after },
            401 | 403 => Error::Auth(message),
            500..=599 => Error::Unavailable { status, message },
            _ => Error::InvalidRequest { status, message },
        }
    }
}

#[async_trait]
impl HttpTransport for RestTransport {
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self
            .base_url
            .join(&request.path)
            .map_err(|e| Error::InvalidRequest {
                status: 0,
                message: format!("bad path '{}': {e}", request.path),
            })?;

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
        };
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(Self::translate)?;
        let status = response.status().as_u16();

        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, message, retry_after));
        }

        let body = if status == 204 {
            serde_json::Value::Null
        } else {
            response.json().await.map_err(Self::translate)?
        };

        Ok(ApiResponse { status, body })
    }
}

/// Rate-limited, circuit-gated, retried request dispatch for one upstream.
pub struct RequestExecutor {
    limiter: Arc<RateLimiter>,
    resilient: ResilientExecutor,
    transport: Arc<dyn HttpTransport>,
}

impl RequestExecutor {
    pub fn new(
        limiter: Arc<RateLimiter>,
        resilient: ResilientExecutor,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            limiter,
            resilient,
            transport,
        }
    }

    /// The composed resilience layer, for metrics and breaker overrides.
    pub fn resilient(&self) -> &ResilientExecutor {
        &self.resilient
    }

    /// Execute a request: limiter admission first (so waiting for tokens
    /// consumes no retry budget), then breaker-gated retried dispatch.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.limiter.acquire(&request.operation).await;
        debug!(operation = %request.operation, path = %request.path, "Dispatching request");

        let transport = &self.transport;
        self.resilient
            .call(|| {
                let request = request.clone();
                async move { transport.call(&request).await }
            })
            .await
    }
}
