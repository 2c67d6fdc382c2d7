//! Async mutual exclusion lock
//!
//! [`Mutex`] is a [`Semaphore`] fixed at one permit. Waiters are admitted in
//! the order they called [`Mutex::lock`], and the lock is handed directly to
//! the next waiter on unlock.
//!
//! The guard unlocks on drop. Code that has to unlock from somewhere else can
//! detach the guard into a [`PermitToken`] and pass it to [`Mutex::unlock`];
//! only the current holder's token is accepted, so unlocking twice is
//! reported as [`GateError::DoubleRelease`].
//!
//! # Examples
//!
//! ```rust,ignore
//! use prometheus_gates::Mutex;
//!
//! let lock = Mutex::new();
//! let guard = lock.lock().await?;
//! assert!(lock.is_locked());
//! guard.unlock()?;
//! assert!(!lock.is_locked());
//! ```

use std::time::Duration;

use crate::core::GateError;
use crate::semaphore::{PendingAcquire, Permit, PermitToken, Semaphore};

/// Async lock admitting one holder at a time. Cloning shares the lock.
#[derive(Debug, Clone)]
pub struct Mutex {
    sem: Semaphore,
}

/// Proof of holding a [`Mutex`]. Unlocks on drop.
#[derive(Debug)]
#[must_use = "dropping the guard unlocks the mutex"]
pub struct MutexGuard {
    permit: Permit,
}

impl MutexGuard {
    /// Unlock now.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::DoubleRelease`] if the lock was already released
    /// through a detached token.
    pub fn unlock(self) -> Result<(), GateError> {
        self.permit.release()
    }

    /// Keep the lock held and return a token for [`Mutex::unlock`].
    pub fn detach(self) -> PermitToken {
        self.permit.detach()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutex {
    /// Create an unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sem: Semaphore::with_capacity(1),
        }
    }

    /// Whether some caller currently holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.sem.available() == 0
    }

    /// Number of callers waiting for the lock.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.sem.waiting()
    }

    /// Lock without waiting.
    pub fn try_lock(&self) -> Option<MutexGuard> {
        self.sem.try_acquire().map(|permit| MutexGuard { permit })
    }

    /// Take a place in line for the lock. See [`Semaphore::start_acquire`].
    pub fn start_lock(&self) -> PendingAcquire {
        self.sem.start_acquire()
    }

    /// Cancel a queued lock request. Returns `false` if it was already
    /// granted or removed.
    pub fn cancel(&self, waiter: crate::wait_queue::WaiterId) -> bool {
        self.sem.cancel(waiter)
    }

    /// Wait for the lock.
    ///
    /// # Errors
    ///
    /// [`GateError::Cancelled`] if the request was cancelled while queued.
    pub async fn lock(&self) -> Result<MutexGuard, GateError> {
        let permit = self.sem.acquire().await?;
        Ok(MutexGuard { permit })
    }

    /// Wait for the lock for at most `timeout`.
    ///
    /// # Errors
    ///
    /// [`GateError::Timeout`] if the lock was not granted in time.
    pub async fn lock_timeout(&self, timeout: Duration) -> Result<MutexGuard, GateError> {
        let permit = self.sem.acquire_timeout(timeout).await?;
        Ok(MutexGuard { permit })
    }

    /// Unlock with a token detached from the current holder's guard.
    ///
    /// # Errors
    ///
    /// [`GateError::DoubleRelease`] for a token that no longer holds the lock,
    /// [`GateError::ForeignPermit`] for a token from another gate.
    pub fn unlock(&self, token: PermitToken) -> Result<(), GateError> {
        self.sem.release(token)
    }
}
