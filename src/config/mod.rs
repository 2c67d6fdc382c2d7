//! Configuration models for schedulers and gates.

pub mod gates;

pub use gates::{
    CircuitBreakerConfig, GatesConfig, RateLimiterConfig, RetryConfig, SchedulerConfig,
    SemaphoreConfig, CONFIG_PATH_ENV,
};
