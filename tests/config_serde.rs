//! Loading retry configuration from JSON.
#![cfg(feature = "serde")]

use std::time::Duration;

use undertow::{Backoff, JitterRange, RetryConfig};

#[test]
fn deserializes_full_config() {
    let json = r#"{
        "max_attempts": 5,
        "maximum_timeout_ms": 2000,
        "backoff": { "kind": "linear", "delay_ms": 100 },
        "jitter": { "min_jitter_ms": 0, "max_jitter_ms": 50 }
    }"#;

    let config: RetryConfig = serde_json::from_str(json).unwrap();

    assert_eq!(config.max_attempts, Some(5));
    assert_eq!(config.maximum_timeout, Some(Duration::from_secs(2)));
    assert_eq!(config.backoff, Backoff::linear(Duration::from_millis(100)));
    assert_eq!(
        config.jitter,
        Some(JitterRange::from_millis(0, 50).unwrap())
    );

    let policy = config.into_policy::<String>().unwrap();
    assert_eq!(policy.len(), 4);
    assert_eq!(policy.deadline(), Some(Duration::from_secs(2)));
}

#[test]
fn optional_fields_default_to_none() {
    let json = r#"{ "backoff": { "kind": "exponential", "base": 2, "exponent": 10 } }"#;

    let config: RetryConfig = serde_json::from_str(json).unwrap();

    assert_eq!(config, RetryConfig::new(Backoff::exponential(2, 10)));
}

#[test]
fn every_backoff_kind_is_accepted() {
    let cases = [
        (
            r#"{ "kind": "constant", "delay_ms": 5 }"#,
            Backoff::constant(Duration::from_millis(5)),
        ),
        (
            r#"{ "kind": "linear", "delay_ms": 5, "increment_ms": 2 }"#,
            Backoff::linear_with_increment(Duration::from_millis(5), Duration::from_millis(2)),
        ),
        (
            r#"{ "kind": "fibonacci", "base_ms": 3 }"#,
            Backoff::fibonacci(Duration::from_millis(3)),
        ),
    ];

    for (json, expected) in cases {
        let backoff: Backoff = serde_json::from_str(json).unwrap();
        assert_eq!(backoff, expected, "decoding {}", json);
    }
}

#[test]
fn inverted_jitter_range_is_rejected() {
    let json = r#"{
        "backoff": { "kind": "constant", "delay_ms": 10 },
        "jitter": { "min_jitter_ms": 50, "max_jitter_ms": 10 }
    }"#;

    let err = serde_json::from_str::<RetryConfig>(json).unwrap_err();

    assert!(
        err.to_string().contains("jitter"),
        "unexpected error: {}",
        err
    );
}

#[test]
fn unknown_backoff_kind_is_rejected() {
    let json = r#"{ "backoff": { "kind": "quadratic", "delay_ms": 10 } }"#;

    assert!(serde_json::from_str::<RetryConfig>(json).is_err());
}

#[test]
fn zero_attempts_parse_but_fail_validation() {
    let json = r#"{ "max_attempts": 0, "backoff": { "kind": "constant", "delay_ms": 1 } }"#;

    let config: RetryConfig = serde_json::from_str(json).unwrap();

    assert!(config.validate().is_err());
}

#[test]
fn serialized_config_uses_millisecond_fields() {
    let config = RetryConfig::new(Backoff::constant(Duration::from_millis(250)))
        .with_maximum_timeout(Duration::from_secs(3))
        .with_jitter(JitterRange::from_millis(10, 20).unwrap());

    let value = serde_json::to_value(&config).unwrap();

    assert_eq!(
        value,
        serde_json::json!({
            "maximum_timeout_ms": 3000,
            "backoff": { "kind": "constant", "delay_ms": 250 },
            "jitter": { "min_jitter_ms": 10, "max_jitter_ms": 20 }
        })
    );
}
