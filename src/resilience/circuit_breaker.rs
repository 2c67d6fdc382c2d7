//! Failure-tracking circuit breaker.
//!
//! The breaker starts `Closed` and counts consecutive failures. Reaching the
//! threshold opens it: calls are refused with [`GateError::CircuitOpen`]
//! without running the operation until `reset_timeout` has passed. The first
//! call after that is the single trial call (`HalfOpen`); its outcome either
//! closes the circuit again or reopens it for another `reset_timeout`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::core::GateError;

/// Breaker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are refused until the reset timeout elapses.
    Open,
    /// One trial call is in flight.
    HalfOpen,
}

#[derive(Debug)]
struct State {
    status: CircuitState,
    failure_count: u32,
    next_attempt_at: Option<Instant>,
    /// Bumped on every close; outcomes from calls admitted earlier are stale.
    generation: u64,
}

impl State {
    fn open(&mut self, now: Instant, reset_timeout: Duration) {
        self.status = CircuitState::Open;
        self.next_attempt_at = Some(now + reset_timeout);
    }

    fn close(&mut self) {
        self.status = CircuitState::Closed;
        self.failure_count = 0;
        self.next_attempt_at = None;
        self.generation = self.generation.wrapping_add(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

#[derive(Debug)]
struct Inner {
    config: CircuitBreakerConfig,
    state: Mutex<State>,
}

/// Circuit breaker wrapping fallible async calls. Cloning shares the state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

/// Settles an admitted call; an abandoned trial reopens the way for another.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    generation: u64,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.admission, self.generation, success);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.settled || self.admission != Admission::Trial {
            return;
        }
        let mut state = self.breaker.inner.state.lock();
        if state.status == CircuitState::HalfOpen && state.generation == self.generation {
            // Trial abandoned before it finished; the next call may try again.
            state.status = CircuitState::Open;
            state.next_attempt_at = Some(Instant::now());
            debug!("circuit trial call abandoned");
        }
    }
}

impl CircuitBreaker {
    /// Create a closed breaker.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Configuration`] if the configuration is invalid.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, GateError> {
        config.validate().map_err(GateError::Configuration)?;
        info!(
            threshold = config.threshold,
            reset_timeout_ms = config.reset_timeout_ms,
            call_timeout_ms = ?config.call_timeout_ms,
            "circuit breaker created"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State {
                    status: CircuitState::Closed,
                    failure_count: 0,
                    next_attempt_at: None,
                    generation: 0,
                }),
            }),
        })
    }

    /// Breaker configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.inner.config
    }

    /// Current status. Reading it never triggers a transition.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.state.lock().status
    }

    /// Consecutive failures counted since the circuit last closed.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.state.lock().failure_count
    }

    /// Time until an open circuit admits its trial call.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        let state = self.inner.state.lock();
        match (state.status, state.next_attempt_at) {
            (CircuitState::Open, Some(at)) => Some(at.saturating_duration_since(Instant::now())),
            _ => None,
        }
    }

    /// Force the circuit closed and clear the failure count.
    pub fn reset(&self) {
        self.inner.state.lock().close();
        info!("circuit breaker reset");
    }

    fn admit(&self) -> Result<(Admission, u64), GateError> {
        let mut state = self.inner.state.lock();
        let now = Instant::now();
        let generation = state.generation;
        match state.status {
            CircuitState::Closed => Ok((Admission::Normal, generation)),
            CircuitState::Open => {
                let at = state.next_attempt_at.unwrap_or(now);
                if now >= at {
                    state.status = CircuitState::HalfOpen;
                    state.next_attempt_at = None;
                    info!("circuit half-open, admitting trial call");
                    Ok((Admission::Trial, generation))
                } else {
                    let retry_after = at - now;
                    debug!(?retry_after, "circuit open, call rejected");
                    Err(GateError::CircuitOpen { retry_after })
                }
            }
            CircuitState::HalfOpen => {
                debug!("trial call in flight, call rejected");
                Err(GateError::CircuitOpen {
                    retry_after: Duration::ZERO,
                })
            }
        }
    }

    fn record(&self, admission: Admission, generation: u64, success: bool) {
        let mut state = self.inner.state.lock();
        if state.generation != generation {
            debug!(?admission, success, "outcome from before the last close ignored");
            return;
        }
        let now = Instant::now();
        match (admission, success) {
            (Admission::Trial, true) => {
                state.close();
                info!("trial call succeeded, circuit closed");
            }
            (Admission::Trial, false) => {
                state.open(now, self.inner.config.reset_timeout());
                warn!("trial call failed, circuit reopened");
            }
            (Admission::Normal, true) => {
                if state.status == CircuitState::Closed {
                    state.failure_count = 0;
                }
            }
            (Admission::Normal, false) => {
                if state.status != CircuitState::Closed {
                    return;
                }
                state.failure_count += 1;
                if state.failure_count >= self.inner.config.threshold {
                    state.open(now, self.inner.config.reset_timeout());
                    warn!(
                        failures = state.failure_count,
                        reset_timeout_ms = self.inner.config.reset_timeout_ms,
                        "failure threshold reached, circuit opened"
                    );
                } else {
                    debug!(failures = state.failure_count, "call failed");
                }
            }
        }
    }

    /// Run `op` through the breaker.
    ///
    /// # Errors
    ///
    /// - [`GateError::CircuitOpen`] if the call was refused; `op` is not invoked
    /// - [`GateError::Timeout`] if the configured call timeout elapsed
    /// - [`GateError::Task`] wrapping the operation's own error
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let (admission, generation) = self.admit()?;
        let guard = CallGuard {
            breaker: self,
            admission,
            generation,
            settled: false,
        };

        let outcome = match self.inner.config.call_timeout() {
            Some(limit) => match tokio::time::timeout(limit, op()).await {
                Ok(result) => result.map_err(GateError::task),
                Err(_) => {
                    warn!(?limit, "guarded call timed out");
                    Err(GateError::Timeout(limit))
                }
            },
            None => op().await.map_err(GateError::task),
        };

        guard.settle(outcome.is_ok());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_threshold(threshold)
                .with_reset_timeout(Duration::from_millis(1000)),
        )
        .unwrap()
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), GateError> {
        b.call(|| async { Err::<(), _>(anyhow::anyhow!("down")) }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, GateError> {
        b.call(|| async { Ok::<_, anyhow::Error>(7) }).await
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(CircuitBreaker::new(CircuitBreakerConfig::new().with_threshold(0)).is_err());
        assert!(CircuitBreaker::new(
            CircuitBreakerConfig::new().with_reset_timeout(Duration::ZERO)
        )
        .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let b = breaker(3);
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(b.failure_count(), 2);
        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.failure_count(), 0);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_failure_reopens() {
        let b = breaker(1);
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(matches!(fail(&b).await, Err(GateError::Task(_))));
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.retry_after(), Some(Duration::from_millis(1000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_counts_as_failure() {
        let b = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_threshold(1)
                .with_call_timeout(Duration::from_millis(50)),
        )
        .unwrap();

        let result = b
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, anyhow::Error>(())
            })
            .await;
        assert!(matches!(result, Err(GateError::Timeout(_))));
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_circuit() {
        let b = breaker(1);
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);
        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(succeed(&b).await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_outcome_after_reset_is_ignored() {
        let b = breaker(1);
        fail(&b).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(1000)).await;

        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let b = b.clone();
            tokio::spawn(async move {
                b.call(|| async move {
                    let _ = gate.await;
                    Err::<(), _>(anyhow::anyhow!("still down"))
                })
                .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        b.reset();
        release.send(()).unwrap();
        assert!(matches!(trial.await.unwrap(), Err(GateError::Task(_))));
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
    }
}
