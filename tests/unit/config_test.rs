//! Tests for configuration validation

use std::io::Write;
use std::time::Duration;

use prometheus_gates::config::{
    CircuitBreakerConfig, GatesConfig, RateLimiterConfig, RetryConfig, SchedulerConfig,
    SemaphoreConfig,
};

#[test]
fn test_scheduler_config_validation() {
    assert!(SchedulerConfig::new().with_max_concurrency(4).validate().is_ok());
    assert!(SchedulerConfig::new().with_max_concurrency(0).validate().is_err());
}

#[test]
fn test_scheduler_config_defaults_to_cpu_count() {
    let cfg: SchedulerConfig = serde_json::from_str("{}").unwrap();
    assert!(cfg.max_concurrency >= 1);
    assert_eq!(cfg.max_concurrency, SchedulerConfig::default().max_concurrency);
    assert!(!cfg.priority_enabled);
}

#[test]
fn test_semaphore_config_invalid_capacity() {
    assert!(SemaphoreConfig { capacity: 0 }.validate().is_err());
    assert!(SemaphoreConfig { capacity: 3 }.validate().is_ok());
}

#[test]
fn test_rate_limiter_config_validation() {
    let valid = RateLimiterConfig::TokenBucket {
        rate: 10.0,
        capacity: 10,
    };
    assert!(valid.validate().is_ok());

    let bad_rate = RateLimiterConfig::TokenBucket {
        rate: f64::NAN,
        capacity: 10,
    };
    assert!(bad_rate.validate().is_err());

    let bad_window = RateLimiterConfig::SlidingWindow {
        limit: 5,
        window_ms: 0,
    };
    assert!(bad_window.validate().is_err());
}

#[test]
fn test_rate_limiter_config_tagged_json() {
    let cfg: RateLimiterConfig =
        serde_json::from_str(r#"{"policy":"sliding-window","limit":3,"window_ms":1000}"#).unwrap();
    assert_eq!(
        cfg,
        RateLimiterConfig::SlidingWindow {
            limit: 3,
            window_ms: 1000
        }
    );
}

#[test]
fn test_retry_config_defaults() {
    let cfg = RetryConfig::new();
    assert_eq!(cfg.max_attempts, 3);
    assert_eq!(cfg.base_delay(), Duration::from_millis(100));
    assert_eq!(cfg.max_delay(), Duration::from_secs(10));
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_retry_config_invalid_values() {
    assert!(RetryConfig::new().with_max_attempts(0).validate().is_err());
    assert!(RetryConfig::new().with_factor(0.9).validate().is_err());
    assert!(RetryConfig::new()
        .with_max_delay(Duration::from_millis(10))
        .validate()
        .is_err());
}

#[test]
fn test_circuit_breaker_config_validation() {
    let cfg = CircuitBreakerConfig::new()
        .with_threshold(3)
        .with_reset_timeout(Duration::from_secs(1));
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.call_timeout(), None);
    assert!(CircuitBreakerConfig::new().with_threshold(0).validate().is_err());
    assert!(CircuitBreakerConfig::new()
        .with_call_timeout(Duration::ZERO)
        .validate()
        .is_err());
}

#[test]
fn test_gates_config_requires_a_gate() {
    assert!(GatesConfig::default().validate().is_err());
}

#[test]
fn test_gates_config_from_json() {
    let json = r#"{
        "schedulers": { "workers": { "max_concurrency": 4 } },
        "semaphores": { "db": { "capacity": 2 } },
        "rate_limiters": { "api": { "policy": "token-bucket", "rate": 10.0, "capacity": 10 } },
        "retry_policies": {
            "default": { "max_attempts": 3, "base_delay_ms": 100, "max_delay_ms": 1000, "factor": 2.0 }
        },
        "circuit_breakers": { "upstream": { "threshold": 3, "reset_timeout_ms": 1000 } }
    }"#;
    let cfg = GatesConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.schedulers["workers"].max_concurrency, 4);
    assert_eq!(cfg.semaphores["db"].capacity, 2);
    assert!(!cfg.retry_policies["default"].jitter_enabled);
    assert_eq!(cfg.circuit_breakers["upstream"].threshold, 3);
}

#[test]
fn test_gates_config_error_names_gate() {
    let json = r#"{ "semaphores": { "db": { "capacity": 0 } } }"#;
    let err = GatesConfig::from_json_str(json).unwrap_err();
    assert!(err.contains("semaphore `db`"), "{err}");
}

#[test]
fn test_gates_config_from_file() {
    let path = std::env::temp_dir().join(format!("gates-{}.json", std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    write!(file, r#"{{ "semaphores": {{ "db": {{ "capacity": 1 }} }} }}"#).unwrap();
    drop(file);

    let cfg = GatesConfig::from_file(&path).unwrap();
    assert_eq!(cfg.semaphores.len(), 1);
    std::fs::remove_file(&path).unwrap();

    assert!(GatesConfig::from_file(&path).is_err());
}
