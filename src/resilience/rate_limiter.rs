//! Time-based admission pacing.
//!
//! Two policies, chosen at construction:
//!
//! - **Token bucket** refills `rate` tokens per second up to `capacity`, so
//!   short bursts of up to `capacity` calls pass immediately.
//! - **Sliding window** remembers the admission times inside the trailing
//!   window and never admits more than `limit` in any window.
//!
//! Waiters are served in arrival order. Only the caller at the head of the
//! line sleeps on the clock; everyone behind it parks until promoted, so a
//! newcomer can never take tokens a queued caller is waiting for.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RateLimiterConfig;
use crate::core::GateError;
use crate::wait_queue::{WaitQueue, WaiterId};

/// Slack for float drift in refill arithmetic.
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug)]
enum Bucket {
    Tokens {
        rate: f64,
        capacity: f64,
        tokens: f64,
        last_refill: Instant,
    },
    Window {
        limit: usize,
        window: Duration,
        admitted: VecDeque<Instant>,
    },
}

impl Bucket {
    fn from_config(cfg: &RateLimiterConfig, now: Instant) -> Self {
        match *cfg {
            RateLimiterConfig::TokenBucket { rate, capacity } => Self::Tokens {
                rate,
                capacity: f64::from(capacity),
                tokens: f64::from(capacity),
                last_refill: now,
            },
            RateLimiterConfig::SlidingWindow { limit, window_ms } => Self::Window {
                limit: limit as usize,
                window: Duration::from_millis(window_ms),
                admitted: VecDeque::with_capacity(limit.min(4096) as usize),
            },
        }
    }

    /// Bring the state up to `now`: refill tokens or drop expired timestamps.
    fn advance(&mut self, now: Instant) {
        match self {
            Self::Tokens {
                rate,
                capacity,
                tokens,
                last_refill,
            } => {
                let elapsed = now.saturating_duration_since(*last_refill).as_secs_f64();
                *tokens = (*tokens + elapsed * *rate).min(*capacity);
                *last_refill = now;
            }
            Self::Window {
                window, admitted, ..
            } => {
                while admitted
                    .front()
                    .is_some_and(|t| now.saturating_duration_since(*t) >= *window)
                {
                    admitted.pop_front();
                }
            }
        }
    }

    /// Admit `n` now, or report how long until `n` could be admitted.
    fn try_take(&mut self, n: u32, now: Instant) -> Result<(), Duration> {
        self.advance(now);
        match self {
            Self::Tokens { rate, tokens, .. } => {
                let need = f64::from(n);
                if *tokens + TOKEN_EPSILON >= need {
                    *tokens = (*tokens - need).max(0.0);
                    Ok(())
                } else {
                    // A tiny rate can push the refill time past what `Duration` holds.
                    Err(Duration::try_from_secs_f64((need - *tokens) / *rate)
                        .unwrap_or(Duration::MAX))
                }
            }
            Self::Window {
                limit,
                window,
                admitted,
            } => {
                let n = n as usize;
                if admitted.len() + n <= *limit {
                    admitted.extend(std::iter::repeat_n(now, n));
                    Ok(())
                } else {
                    // The oldest `excess` admissions have to leave the window first.
                    let excess = admitted.len() + n - *limit;
                    let leaves_at = admitted[excess - 1] + *window;
                    Err(leaves_at.saturating_duration_since(now))
                }
            }
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn available(&mut self, now: Instant) -> u32 {
        self.advance(now);
        match self {
            Self::Tokens { tokens, .. } => (*tokens + TOKEN_EPSILON).floor() as u32,
            Self::Window {
                limit, admitted, ..
            } => u32::try_from(limit.saturating_sub(admitted.len())).unwrap_or(u32::MAX),
        }
    }
}

#[derive(Debug)]
struct State {
    bucket: Bucket,
    waiters: WaitQueue<()>,
}

impl State {
    /// Wake the new head of the line so it starts watching the clock.
    fn promote_front(&mut self) {
        if let Some(front) = self.waiters.front_mut() {
            let _ = front.resume(());
        }
    }
}

#[derive(Debug)]
struct Inner {
    policy: RateLimiterConfig,
    max_batch: u32,
    state: Mutex<State>,
}

/// Token-bucket or sliding-window admission gate. Cloning shares the budget.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

enum Step {
    Admitted,
    Sleep(Duration),
    Park,
}

/// A queued acquisition; withdraws itself from the line when dropped.
struct Ticket<'a> {
    limiter: &'a RateLimiter,
    id: WaiterId,
    promoted: Option<oneshot::Receiver<()>>,
    done: bool,
}

impl Ticket<'_> {
    async fn wait(mut self, n: u32) -> Result<(), GateError> {
        loop {
            let step = {
                let mut state = self.limiter.inner.state.lock();
                if state.waiters.front_id() == Some(self.id) {
                    match state.bucket.try_take(n, Instant::now()) {
                        Ok(()) => {
                            state.waiters.pop_front();
                            state.promote_front();
                            self.done = true;
                            Step::Admitted
                        }
                        Err(wait) => Step::Sleep(wait),
                    }
                } else {
                    Step::Park
                }
            };
            match step {
                Step::Admitted => {
                    debug!(waiter = self.id, n, "rate limiter admitted queued request");
                    return Ok(());
                }
                Step::Sleep(wait) => {
                    debug!(waiter = self.id, ?wait, "rate limiter head waiting for budget");
                    tokio::time::sleep(wait).await;
                }
                Step::Park => match self.promoted.take() {
                    Some(rx) => {
                        let _ = rx.await;
                    }
                    None => tokio::task::yield_now().await,
                },
            }
        }
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut state = self.limiter.inner.state.lock();
        let was_front = state.waiters.front_id() == Some(self.id);
        if state.waiters.remove(self.id).is_some() {
            debug!(waiter = self.id, "rate limiter request withdrawn");
            if was_front {
                state.promote_front();
            }
        }
    }
}

impl RateLimiter {
    /// Create a limiter from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Configuration`] if the configuration is invalid.
    pub fn new(policy: RateLimiterConfig) -> Result<Self, GateError> {
        policy.validate().map_err(GateError::Configuration)?;
        let max_batch = match policy {
            RateLimiterConfig::TokenBucket { capacity, .. } => capacity,
            RateLimiterConfig::SlidingWindow { limit, .. } => limit,
        };
        info!(?policy, "rate limiter created");
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    bucket: Bucket::from_config(&policy, Instant::now()),
                    waiters: WaitQueue::new(),
                }),
                policy,
                max_batch,
            }),
        })
    }

    /// Token bucket refilling `rate` tokens per second, holding at most `capacity`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Configuration`] for a non-positive rate or zero capacity.
    pub fn token_bucket(rate: f64, capacity: u32) -> Result<Self, GateError> {
        Self::new(RateLimiterConfig::TokenBucket { rate, capacity })
    }

    /// Sliding window admitting at most `limit` requests per `window`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Configuration`] for a zero limit or window.
    pub fn sliding_window(limit: u32, window: Duration) -> Result<Self, GateError> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        Self::new(RateLimiterConfig::SlidingWindow { limit, window_ms })
    }

    /// Policy this limiter was built with.
    #[must_use]
    pub fn policy(&self) -> &RateLimiterConfig {
        &self.inner.policy
    }

    /// Whole tokens (or window slots) available right now.
    #[must_use]
    pub fn available_tokens(&self) -> u32 {
        self.inner.state.lock().bucket.available(Instant::now())
    }

    /// Number of callers waiting for budget.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    fn check_batch(&self, n: u32) -> Result<(), GateError> {
        if n > self.inner.max_batch {
            return Err(GateError::Configuration(format!(
                "request for {n} exceeds limiter capacity {}",
                self.inner.max_batch
            )));
        }
        Ok(())
    }

    /// Take `n` units without waiting. Fails while anyone is queued.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Configuration`] if `n` can never be satisfied.
    pub fn try_acquire(&self, n: u32) -> Result<bool, GateError> {
        self.check_batch(n)?;
        if n == 0 {
            return Ok(true);
        }
        let mut state = self.inner.state.lock();
        Ok(state.waiters.is_empty() && state.bucket.try_take(n, Instant::now()).is_ok())
    }

    /// Take `n` units, waiting in line as long as necessary.
    ///
    /// Dropping the returned future withdraws the request without consuming
    /// any budget.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Configuration`] if `n` exceeds the bucket capacity
    /// or window limit.
    pub async fn acquire(&self, n: u32) -> Result<(), GateError> {
        self.check_batch(n)?;
        if n == 0 {
            return Ok(());
        }
        let ticket = {
            let mut state = self.inner.state.lock();
            if state.waiters.is_empty() && state.bucket.try_take(n, Instant::now()).is_ok() {
                return Ok(());
            }
            let (id, rx) = state.waiters.push();
            debug!(waiter = id, n, queued = state.waiters.len(), "rate limiter request parked");
            Ticket {
                limiter: self,
                id,
                promoted: Some(rx),
                done: false,
            }
        };
        ticket.wait(n).await
    }

    /// Take `n` units, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`GateError::Timeout`] if the budget did not free up in time.
    pub async fn acquire_timeout(&self, n: u32, timeout: Duration) -> Result<(), GateError> {
        match tokio::time::timeout(timeout, self.acquire(n)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(n, ?timeout, "rate limiter acquire timed out");
                Err(GateError::Timeout(timeout))
            }
        }
    }

    /// Run `op` once `n` units have been admitted.
    ///
    /// # Errors
    ///
    /// Propagates acquisition errors; the operation's output is returned in `Ok`.
    pub async fn call<F, Fut, T>(&self, n: u32, op: F) -> Result<T, GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire(n).await?;
        Ok(op().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_policies_rejected() {
        assert!(RateLimiter::token_bucket(0.0, 10).is_err());
        assert!(RateLimiter::token_bucket(f64::NAN, 10).is_err());
        assert!(RateLimiter::token_bucket(5.0, 0).is_err());
        assert!(RateLimiter::sliding_window(0, Duration::from_secs(1)).is_err());
        assert!(RateLimiter::sliding_window(3, Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_rate_times_out_instead_of_overflowing() {
        let limiter = RateLimiter::token_bucket(1e-20, 1).unwrap();
        limiter.acquire(1).await.unwrap();

        let err = limiter
            .acquire_timeout(1, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Timeout(d) if d == Duration::from_millis(10)));
        assert_eq!(limiter.waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_burst_then_empty() {
        let limiter = RateLimiter::token_bucket(10.0, 3).unwrap();
        assert_eq!(limiter.available_tokens(), 3);
        assert!(limiter.try_acquire(1).unwrap());
        assert!(limiter.try_acquire(2).unwrap());
        assert!(!limiter.try_acquire(1).unwrap());
        assert_eq!(limiter.available_tokens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_refills_over_time() {
        let limiter = RateLimiter::token_bucket(10.0, 5).unwrap();
        assert!(limiter.try_acquire(5).unwrap());

        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(limiter.available_tokens(), 3);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(limiter.available_tokens(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_rejected() {
        let limiter = RateLimiter::token_bucket(1.0, 2).unwrap();
        assert!(matches!(
            limiter.acquire(3).await,
            Err(GateError::Configuration(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_hard_cap() {
        let limiter = RateLimiter::sliding_window(2, Duration::from_millis(500)).unwrap();
        let start = Instant::now();
        limiter.acquire(1).await.unwrap();
        limiter.acquire(1).await.unwrap();
        assert_eq!(limiter.available_tokens(), 0);

        limiter.acquire(1).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_consume_budget() {
        let limiter = RateLimiter::token_bucket(1.0, 1).unwrap();
        limiter.acquire(1).await.unwrap();

        let err = limiter
            .acquire_timeout(1, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Timeout(_)));
        assert_eq!(limiter.waiting(), 0);

        tokio::time::advance(Duration::from_millis(800)).await;
        assert_eq!(limiter.available_tokens(), 1);
    }
}
