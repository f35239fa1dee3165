//! Configuration loading and validation from TOML files.

use std::fs;

use gimbal::config::Config;
use gimbal::error::{ConfigError, Error};

fn load(contents: &str) -> Result<Config, Error> {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("gimbal.toml");
    fs::write(&path, contents).expect("write temp config");
    Config::load(&path)
}

#[test]
fn full_config_round_trips() {
    let config = load(
        r#"
[logging]
level = "debug"
format = "json"

[limiter]
capacity = 40.0
refill_per_sec = 20.0

[limiter.weights]
place_order = 4
cancel_order = 2

[breaker]
failure_threshold = 3
reset_timeout_ms = 10000

[retry]
max_attempts = 5
base_delay_ms = 250

[stream]
heartbeat_interval_ms = 15000
max_reconnect_attempts = 20

[nonce]
min_sync_interval_ms = 2000
"#,
    )
    .unwrap();

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.limiter.weights["place_order"], 4);
    assert_eq!(config.breaker.failure_threshold, 3);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.stream.max_reconnect_attempts, 20);
    assert_eq!(config.nonce.min_sync_interval_ms, 2_000);
}

#[test]
fn empty_file_yields_defaults() {
    let config = load("").unwrap();

    assert_eq!(config.limiter.capacity, 10.0);
    assert_eq!(config.breaker.failure_threshold, 5);
    assert_eq!(config.retry.max_attempts, 3);
    assert!(config.stream.heartbeat_enabled);
}

#[test]
fn out_of_range_error_rate_is_rejected() {
    let result = load(
        r#"
[breaker]
error_rate_threshold = 1.5
"#,
    );

    match result {
        Err(Error::Config(ConfigError::InvalidValue {
            field: "breaker.error_rate_threshold",
            ..
        })) => {}
        other => panic!("expected invalid error_rate_threshold, got {other:?}"),
    }
}

#[test]
fn inverted_backoff_bounds_are_rejected() {
    let result = load(
        r#"
[retry]
base_delay_ms = 5000
max_delay_ms = 100
"#,
    );

    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::InvalidValue {
            field: "retry.max_delay_ms",
            ..
        }))
    ));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let result = load("[breaker\nfailure_threshold = 3");
    assert!(matches!(result, Err(Error::Config(ConfigError::Parse(_)))));
}

#[test]
fn missing_file_is_a_read_error() {
    let result = Config::load("/nonexistent/gimbal.toml");
    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::ReadFile(_)))
    ));
}
