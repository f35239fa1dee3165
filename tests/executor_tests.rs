//! Request pipeline integration: rate-limit admission, retry on transient
//! failures, and terminal-error propagation through [`RequestExecutor`].

mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gimbal::composer::ResilientExecutor;
use gimbal::error::Error;
use gimbal::executor::{ApiRequest, RequestExecutor};
use gimbal::limiter::{RateLimiter, RateLimiterConfig};

use support::{fast_breaker, fast_retry, ok_response, ScriptedHttp};

fn executor(limiter: RateLimiter, transport: Arc<ScriptedHttp>) -> RequestExecutor {
    RequestExecutor::new(
        Arc::new(limiter),
        ResilientExecutor::new(fast_breaker(10, 60_000), fast_retry(3)),
        transport,
    )
}

fn roomy_limiter() -> RateLimiter {
    RateLimiter::new(RateLimiterConfig {
        capacity: 100.0,
        refill_per_sec: 100.0,
        default_cost: 1,
        weights: HashMap::new(),
    })
}

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    let transport = ScriptedHttp::new(vec![
        Err(Error::ConnectionDropped("reset by peer".into())),
        Err(Error::Unavailable {
            status: 502,
            message: "bad gateway".into(),
        }),
        ok_response(serde_json::json!({ "balance": "125.00" })),
    ]);
    let exec = executor(roomy_limiter(), transport.clone());

    let response = exec
        .execute(ApiRequest::get("/balance", "get_balance"))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body["balance"], "125.00");
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn terminal_errors_never_retry() {
    let transport = ScriptedHttp::new(vec![Err(Error::InvalidRequest {
        status: 400,
        message: "size below minimum".into(),
    })]);
    let exec = executor(roomy_limiter(), transport.clone());

    let result = exec
        .execute(
            ApiRequest::post("/orders", "place_order", serde_json::json!({ "size": "0" }))
                .unwrap(),
        )
        .await;

    assert!(matches!(result, Err(Error::InvalidRequest { status: 400, .. })));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn exhausted_budget_reports_attempt_count_and_cause() {
    let transport = ScriptedHttp::new(vec![
        Err(Error::ConnectionDropped("down".into())),
        Err(Error::ConnectionDropped("down".into())),
        Err(Error::ConnectionDropped("down".into())),
    ]);
    let exec = executor(roomy_limiter(), transport.clone());

    let result = exec.execute(ApiRequest::get("/markets", "list_markets")).await;

    match result {
        Err(Error::MaxRetriesExceeded { attempts, source }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, Error::ConnectionDropped(_)));
        }
        other => panic!("expected MaxRetriesExceeded, got {other:?}"),
    }
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn weighted_operation_waits_for_tokens() {
    let mut weights = HashMap::new();
    weights.insert("place_order".to_string(), 2);
    // 2 tokens, 100/sec: the second weighted call must wait ~20ms.
    let limiter = RateLimiter::new(RateLimiterConfig {
        capacity: 2.0,
        refill_per_sec: 100.0,
        default_cost: 1,
        weights,
    });
    let transport = ScriptedHttp::new(vec![
        ok_response(serde_json::Value::Null),
        ok_response(serde_json::Value::Null),
    ]);
    let exec = executor(limiter, transport.clone());

    let order = ApiRequest::post("/orders", "place_order", serde_json::json!({})).unwrap();
    exec.execute(order.clone()).await.unwrap();

    let start = Instant::now();
    exec.execute(order).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(10));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn rate_limit_admission_precedes_dispatch() {
    // Drain the bucket before the request; the transport must not be
    // touched until tokens are back.
    let limiter = RateLimiter::new(RateLimiterConfig {
        capacity: 1.0,
        refill_per_sec: 50.0,
        default_cost: 1,
        weights: HashMap::new(),
    });
    limiter.acquire("warmup").await;

    let transport = ScriptedHttp::new(vec![ok_response(serde_json::Value::Null)]);
    let exec = executor(limiter, transport.clone());

    let start = Instant::now();
    exec.execute(ApiRequest::get("/time", "get_time")).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(10));
    assert_eq!(transport.seen()[0].operation, "get_time");
}
