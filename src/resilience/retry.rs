//! Retry with exponential backoff.
//!
//! ```rust,ignore
//! use prometheus_gates::resilience::{RetryIf, RetryPolicy};
//! use prometheus_gates::config::RetryConfig;
//!
//! let policy = RetryPolicy::new(RetryConfig::new().with_max_attempts(5))?
//!     .with_predicate(RetryIf(|e: &std::io::Error, _attempt| e.kind() != std::io::ErrorKind::NotFound));
//! let body = policy.retry(|| fetch_manifest()).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::core::GateError;

/// Decides whether a failed attempt should be retried.
pub trait RetryPredicate<E> {
    /// `attempt` is the 1-based number of the attempt that just failed.
    fn should_retry(&self, error: &E, attempt: u32) -> bool;
}

/// Retry every failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E> RetryPredicate<E> for AlwaysRetry {
    fn should_retry(&self, _error: &E, _attempt: u32) -> bool {
        true
    }
}

/// Never retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl<E> RetryPredicate<E> for NeverRetry {
    fn should_retry(&self, _error: &E, _attempt: u32) -> bool {
        false
    }
}

/// Retry when the closure returns true.
#[derive(Debug, Clone, Copy)]
pub struct RetryIf<F>(pub F);

impl<E, F: Fn(&E, u32) -> bool> RetryPredicate<E> for RetryIf<F> {
    fn should_retry(&self, error: &E, attempt: u32) -> bool {
        (self.0)(error, attempt)
    }
}

/// Backoff configuration plus a retry predicate. Holds no per-call state.
#[derive(Debug, Clone)]
pub struct RetryPolicy<P = AlwaysRetry> {
    config: RetryConfig,
    predicate: P,
}

impl RetryPolicy {
    /// Create a policy that retries every failure.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Configuration`] if the configuration is invalid.
    pub fn new(config: RetryConfig) -> Result<Self, GateError> {
        config.validate().map_err(GateError::Configuration)?;
        Ok(Self {
            config,
            predicate: AlwaysRetry,
        })
    }
}

impl<P> RetryPolicy<P> {
    /// Replace the retry predicate.
    pub fn with_predicate<Q>(self, predicate: Q) -> RetryPolicy<Q> {
        RetryPolicy {
            config: self.config,
            predicate,
        }
    }

    /// Backoff configuration.
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter:
    /// `min(max_delay, base_delay * factor^(attempt-1))`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_nanos = self.config.base_delay().as_nanos() as f64;
        let max_nanos = self.config.max_delay().as_nanos() as f64;
        let nanos = (base_nanos * self.config.factor.powi(exponent)).min(max_nanos);
        Duration::from_nanos(nanos as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.config.jitter_enabled {
            return delay;
        }
        let scale: f64 = rand::rng().random_range(0.5..1.5);
        delay.mul_f64(scale)
    }

    /// Run `op` until it succeeds, the predicate declines, or attempts run out.
    ///
    /// Each attempt calls `op` afresh; the only state carried between
    /// attempts is the attempt counter.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt made.
    pub async fn retry<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: RetryPredicate<E>,
    {
        let max_attempts = self.config.max_attempts;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if attempt >= max_attempts {
                        warn!(attempt, max_attempts, "retry attempts exhausted");
                        return Err(error);
                    }
                    if !self.predicate.should_retry(&error, attempt) {
                        debug!(attempt, "error not retryable");
                        return Err(error);
                    }
                    let delay = self.jittered(self.delay_for_attempt(attempt));
                    debug!(attempt, ?delay, "attempt failed, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
