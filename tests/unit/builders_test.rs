//! Tests for builder modules

use prometheus_gates::builders::build_gates;
use prometheus_gates::config::{GatesConfig, RateLimiterConfig, SchedulerConfig, SemaphoreConfig};
use prometheus_gates::{GateError, TokioSpawner};

#[tokio::test]
async fn test_build_gates_from_config() {
    let mut cfg = GatesConfig::default();
    cfg.schedulers.insert(
        "workers".into(),
        SchedulerConfig::new().with_max_concurrency(2),
    );
    cfg.semaphores
        .insert("db".into(), SemaphoreConfig { capacity: 3 });
    cfg.rate_limiters.insert(
        "api".into(),
        RateLimiterConfig::TokenBucket {
            rate: 5.0,
            capacity: 5,
        },
    );

    let registry = build_gates(&cfg, TokioSpawner::current()).unwrap();
    assert_eq!(registry.len(), 3);
    assert_eq!(registry.scheduler("workers").unwrap().name(), "workers");
    assert_eq!(registry.semaphore("db").unwrap().capacity(), 3);
    assert_eq!(registry.rate_limiter("api").unwrap().available_tokens(), 5);
    assert!(registry.circuit_breaker("missing").is_none());

    let out = registry
        .scheduler("workers")
        .unwrap()
        .submit(|| async { Ok::<_, anyhow::Error>(3) })
        .unwrap()
        .await
        .unwrap();
    assert_eq!(out, 3);
}

#[tokio::test]
async fn test_build_gates_rejects_invalid() {
    let mut cfg = GatesConfig::default();
    cfg.schedulers.insert(
        "workers".into(),
        SchedulerConfig::new().with_max_concurrency(0),
    );
    let result = build_gates(&cfg, TokioSpawner::current());
    assert!(matches!(result, Err(GateError::Configuration(msg)) if msg.contains("workers")));
}

#[tokio::test]
async fn test_build_gates_rejects_empty() {
    let result = build_gates(&GatesConfig::default(), TokioSpawner::current());
    assert!(result.is_err());
}
