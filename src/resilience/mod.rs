//! Call-level resilience gates: rate limiting, retry with backoff, and
//! circuit breaking.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::RateLimiter;
pub use retry::{AlwaysRetry, NeverRetry, RetryIf, RetryPolicy, RetryPredicate};
