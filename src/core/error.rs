//! Error types for gate operations.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by gates and the scheduler.
#[derive(Debug, Error)]
pub enum GateError {
    /// Invalid construction parameters.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// An acquisition or guarded call exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Failure raised by caller-supplied work.
    #[error("task failed: {0}")]
    Task(anyhow::Error),
    /// Call rejected without execution because the breaker is open.
    #[error("circuit open, retry after {retry_after:?}")]
    CircuitOpen {
        /// Time left until the breaker admits a trial call.
        retry_after: Duration,
    },
    /// A permit was released more than once.
    #[error("permit {permit} released more than once")]
    DoubleRelease {
        /// Identifier of the offending permit.
        permit: u64,
    },
    /// A permit token was presented to a gate that did not issue it.
    #[error("permit was issued by a different gate")]
    ForeignPermit,
    /// A pending acquisition was cancelled before it was granted.
    #[error("acquisition cancelled")]
    Cancelled,
    /// The scheduler is draining and no longer admits submissions.
    #[error("scheduler is draining")]
    Draining,
}

impl GateError {
    /// Wrap a caller failure as a task error.
    pub fn task(err: impl Into<anyhow::Error>) -> Self {
        Self::Task(err.into())
    }

    /// True for errors that indicate a programming defect rather than a
    /// runtime condition the caller can recover from.
    #[must_use]
    pub const fn is_defect(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::DoubleRelease { .. } | Self::ForeignPermit
        )
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
