//! # Prometheus Gates
//!
//! Async concurrency-coordination primitives for services that call slow or
//! unreliable dependencies.
//!
//! Every gate decides *when* a unit of work may proceed. Gates are composable:
//! a task submitted to a [`Scheduler`] may call through a [`RateLimiter`] into
//! a [`CircuitBreaker`]-guarded operation, and a [`RetryPolicy`] can wrap the
//! whole chain.
//!
//! ## Gates
//!
//! - **[`WaitQueue`]**: ordered holder of parked acquisitions, shared by the
//!   other gates
//! - **[`Semaphore`] / [`Mutex`]**: counting admission with FIFO hand-off and
//!   detachable permits
//! - **[`Scheduler`]**: bounded-concurrency task execution with drain for
//!   graceful shutdown
//! - **[`RateLimiter`]**: token-bucket or sliding-window pacing
//! - **[`RetryPolicy`]**: exponential backoff with optional jitter
//! - **[`CircuitBreaker`]**: fail-fast after repeated failures, with a single
//!   trial call after the reset timeout
//!
//! ## Scheduler
//!
//! ```rust,ignore
//! use prometheus_gates::{Scheduler, config::SchedulerConfig};
//!
//! let scheduler = Scheduler::with_tokio(SchedulerConfig::new().with_max_concurrency(4))?;
//! let handle = scheduler.submit(|| async { fetch_page().await })?;
//! let page = handle.await?;
//!
//! scheduler.drain().await;
//! ```
//!
//! ## Composing gates
//!
//! ```rust,ignore
//! use prometheus_gates::{CircuitBreaker, RateLimiter, RetryPolicy};
//! use prometheus_gates::config::{CircuitBreakerConfig, RetryConfig};
//!
//! let limiter = RateLimiter::token_bucket(10.0, 10)?;
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::new().with_threshold(3))?;
//! let retry = RetryPolicy::new(RetryConfig::new())?;
//!
//! let body = retry
//!     .retry(|| async {
//!         limiter.acquire(1).await?;
//!         breaker.call(|| client.get(url)).await
//!     })
//!     .await?;
//! ```
//!
//! Gates can also be built by name from a JSON file with
//! [`config::GatesConfig`] and [`builders::build_gates`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions, audit trail and error types.
pub mod core;
/// Configuration models for every gate.
pub mod config;
/// Builders to construct gates from configuration.
pub mod builders;
/// Runtime adapters for task execution.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub mod mutex;
pub mod resilience;
pub mod semaphore;
pub mod wait_queue;

pub use crate::core::{AppResult, GateError, Scheduler, SchedulerStats, Spawn, TaskHandle};
pub use crate::mutex::{Mutex, MutexGuard};
pub use crate::resilience::{CircuitBreaker, CircuitState, RateLimiter, RetryPolicy};
pub use crate::runtime::TokioSpawner;
pub use crate::semaphore::{PendingAcquire, Permit, PermitToken, Semaphore};
pub use crate::util::serde::Priority;
pub use crate::wait_queue::{WaitQueue, WaiterId};
