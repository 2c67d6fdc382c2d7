//! Counting semaphore with FIFO hand-off.
//!
//! A [`Semaphore`] holds `capacity` permits. [`Semaphore::acquire`] returns a
//! [`Permit`] immediately while permits remain, otherwise the caller is parked
//! in a [`WaitQueue`] until a permit is released. Release hands the slot
//! directly to the oldest waiter while the gate lock is held, so a concurrent
//! `try_acquire` can never steal it.
//!
//! # Examples
//!
//! ```rust,ignore
//! use prometheus_gates::Semaphore;
//! use std::time::Duration;
//!
//! let sem = Semaphore::new(2)?;
//! let a = sem.acquire().await?;
//! let b = sem.acquire().await?;
//! assert!(sem.try_acquire().is_none());
//!
//! drop(a);
//! let c = sem.acquire_timeout(Duration::from_millis(50)).await?;
//! ```
//!
//! Permits can be detached into a [`PermitToken`] for code that releases by
//! hand. Releasing the same token twice is reported as
//! [`GateError::DoubleRelease`].

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::SemaphoreConfig;
use crate::core::GateError;
use crate::util::serde::Priority;
use crate::wait_queue::{WaitQueue, WaiterId};

/// Mutable gate state, guarded by the semaphore's single lock.
#[derive(Debug)]
struct State {
    available: usize,
    outstanding: HashSet<u64>,
    next_permit: u64,
    waiters: WaitQueue<u64>,
}

impl State {
    fn issue(&mut self) -> u64 {
        let id = self.next_permit;
        self.next_permit += 1;
        self.outstanding.insert(id);
        id
    }
}

#[derive(Debug)]
struct Inner {
    id: Uuid,
    capacity: usize,
    state: Mutex<State>,
}

/// Counting admission gate. Cloning shares the same permits.
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<Inner>,
}

/// Detached record of a held permit, released with [`Semaphore::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PermitToken {
    gate: Uuid,
    permit: u64,
}

impl PermitToken {
    /// Identifier of the permit within its gate.
    #[must_use]
    pub const fn permit_id(&self) -> u64 {
        self.permit
    }
}

/// A unit of capacity. Returned to the semaphore on drop.
#[derive(Debug)]
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    sem: Semaphore,
    id: u64,
    released: bool,
}

impl Permit {
    /// Identifier of this permit within its gate.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Release the permit now.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::DoubleRelease`] if the permit was already released
    /// through a detached token.
    pub fn release(mut self) -> Result<(), GateError> {
        self.released = true;
        self.sem.release_permit(self.id)
    }

    /// Stop tracking the permit and return a token for manual release.
    ///
    /// The slot stays occupied until the token is passed to
    /// [`Semaphore::release`].
    pub fn detach(mut self) -> PermitToken {
        self.released = true;
        PermitToken {
            gate: self.sem.inner.id,
            permit: self.id,
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.sem.release_permit(self.id) {
                error!(permit = self.id, error = %e, "permit release on drop failed");
            }
        }
    }
}

enum Pending {
    Ready(Permit),
    Waiting {
        id: WaiterId,
        rx: oneshot::Receiver<u64>,
    },
    Finished,
}

/// An acquisition that has taken its place in line but may not be granted yet.
///
/// Created by [`Semaphore::start_acquire`]. The place in the queue is fixed at
/// creation, which lets callers enqueue synchronously and wait later. Dropping
/// it before the grant withdraws the request; dropping it after a grant it
/// never observed returns that permit.
#[must_use = "a pending acquisition is withdrawn when dropped"]
pub struct PendingAcquire {
    sem: Semaphore,
    state: Pending,
}

impl std::fmt::Debug for PendingAcquire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            Pending::Ready(_) => "ready",
            Pending::Waiting { .. } => "waiting",
            Pending::Finished => "finished",
        };
        f.debug_struct("PendingAcquire")
            .field("waiter", &self.id())
            .field("state", &state)
            .finish()
    }
}

impl PendingAcquire {
    /// Queue identifier, or `None` if the permit was granted without queueing.
    #[must_use]
    pub const fn id(&self) -> Option<WaiterId> {
        match &self.state {
            Pending::Waiting { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Whether the permit was available at creation.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.state, Pending::Ready(_))
    }

    /// Wait for the grant.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Cancelled`] if the request was removed with
    /// [`Semaphore::cancel`] before it was granted.
    pub async fn wait(mut self) -> Result<Permit, GateError> {
        let received = match &mut self.state {
            Pending::Waiting { rx, .. } => Some(rx.await),
            _ => None,
        };
        match (std::mem::replace(&mut self.state, Pending::Finished), received) {
            (Pending::Ready(permit), _) => Ok(permit),
            (Pending::Waiting { .. }, Some(Ok(permit))) => Ok(self.sem.adopt(permit)),
            _ => Err(GateError::Cancelled),
        }
    }

    /// Wait for the grant for at most `timeout`.
    ///
    /// A request whose timeout fires is removed under the gate lock; if a
    /// release granted it before that point, the grant stands and the permit
    /// is returned.
    ///
    /// # Errors
    ///
    /// [`GateError::Timeout`] when the deadline passes first,
    /// [`GateError::Cancelled`] when the request was cancelled.
    pub async fn wait_timeout(mut self, timeout: Duration) -> Result<Permit, GateError> {
        let received = match &mut self.state {
            Pending::Waiting { rx, .. } => Some(tokio::time::timeout(timeout, rx).await),
            _ => None,
        };
        match (std::mem::replace(&mut self.state, Pending::Finished), received) {
            (Pending::Ready(permit), _) => Ok(permit),
            (Pending::Waiting { .. }, Some(Ok(Ok(permit)))) => Ok(self.sem.adopt(permit)),
            (Pending::Waiting { id, mut rx }, Some(Err(_elapsed))) => {
                match self.sem.withdraw(id, &mut rx) {
                    Some(permit) => {
                        debug!(waiter = id, permit, "grant won the race against timeout");
                        Ok(self.sem.adopt(permit))
                    }
                    None => {
                        warn!(waiter = id, ?timeout, "semaphore acquire timed out");
                        Err(GateError::Timeout(timeout))
                    }
                }
            }
            _ => Err(GateError::Cancelled),
        }
    }
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        if let Pending::Waiting { id, rx } = &mut self.state {
            if let Some(permit) = self.sem.withdraw(*id, rx) {
                debug!(waiter = *id, permit, "returning permit granted to abandoned waiter");
                if let Err(e) = self.sem.release_permit(permit) {
                    error!(permit, error = %e, "failed to return abandoned permit");
                }
            }
        }
    }
}

impl Semaphore {
    /// Create a semaphore with `capacity` permits.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Configuration`] when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, GateError> {
        if capacity == 0 {
            return Err(GateError::Configuration(
                "semaphore capacity must be greater than 0".into(),
            ));
        }
        Ok(Self::with_capacity(capacity))
    }

    /// Create a semaphore from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Configuration`] if the configuration is invalid.
    pub fn from_config(cfg: &SemaphoreConfig) -> Result<Self, GateError> {
        cfg.validate().map_err(GateError::Configuration)?;
        Self::new(cfg.capacity)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        debug!(capacity, "semaphore created");
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                capacity,
                state: Mutex::new(State {
                    available: capacity,
                    outstanding: HashSet::with_capacity(capacity.min(1024)),
                    next_permit: 0,
                    waiters: WaitQueue::new(),
                }),
            }),
        }
    }

    /// Unique identity of this gate.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Total permits.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Permits not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.state.lock().available
    }

    /// Number of parked acquisitions.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Take a permit without waiting.
    ///
    /// Fails while any earlier request is still queued, so queued waiters are
    /// never overtaken.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut state = self.inner.state.lock();
        if state.available == 0 || !state.waiters.is_empty() {
            return None;
        }
        state.available -= 1;
        let id = state.issue();
        drop(state);
        Some(self.adopt(id))
    }

    /// Take a place in line at normal priority.
    pub fn start_acquire(&self) -> PendingAcquire {
        self.start_acquire_with_priority(Priority::Normal)
    }

    /// Take a place in line. Higher priorities are granted first; equal
    /// priorities keep request order.
    pub fn start_acquire_with_priority(&self, priority: Priority) -> PendingAcquire {
        let mut state = self.inner.state.lock();
        if state.available > 0 && state.waiters.is_empty() {
            state.available -= 1;
            let id = state.issue();
            drop(state);
            return PendingAcquire {
                sem: self.clone(),
                state: Pending::Ready(self.adopt(id)),
            };
        }
        let (id, rx) = state.waiters.push_with_priority(priority);
        debug!(waiter = id, queued = state.waiters.len(), "semaphore acquire parked");
        drop(state);
        PendingAcquire {
            sem: self.clone(),
            state: Pending::Waiting { id, rx },
        }
    }

    /// Acquire a permit, waiting as long as necessary.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Cancelled`] if the request is cancelled while
    /// parked.
    pub async fn acquire(&self) -> Result<Permit, GateError> {
        self.start_acquire().wait().await
    }

    /// Acquire a permit, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`GateError::Timeout`] if no permit was granted in time.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Permit, GateError> {
        self.start_acquire().wait_timeout(timeout).await
    }

    /// Remove a parked request without touching the permit count.
    ///
    /// Returns `false` if the request is no longer queued, including when it
    /// has already been granted.
    pub fn cancel(&self, waiter: WaiterId) -> bool {
        let removed = self.inner.state.lock().waiters.remove(waiter).is_some();
        if removed {
            debug!(waiter, "semaphore acquire cancelled");
        }
        removed
    }

    /// Release a detached permit.
    ///
    /// # Errors
    ///
    /// [`GateError::ForeignPermit`] if another gate issued the token and
    /// [`GateError::DoubleRelease`] if it was already released.
    pub fn release(&self, token: PermitToken) -> Result<(), GateError> {
        if token.gate != self.inner.id {
            error!(permit = token.permit, "permit token presented to the wrong gate");
            return Err(GateError::ForeignPermit);
        }
        self.release_permit(token.permit)
    }

    /// Run `op` while holding a permit.
    ///
    /// # Errors
    ///
    /// Propagates acquisition errors; the operation's own output is returned
    /// unchanged inside `Ok`.
    pub async fn run<F, Fut, T>(&self, op: F) -> Result<T, GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = self.acquire().await?;
        let out = op().await;
        drop(permit);
        Ok(out)
    }

    fn adopt(&self, id: u64) -> Permit {
        Permit {
            sem: self.clone(),
            id,
            released: false,
        }
    }

    /// Take a waiter out of line. If it was already granted, returns the
    /// permit it was handed.
    fn withdraw(&self, waiter: WaiterId, rx: &mut oneshot::Receiver<u64>) -> Option<u64> {
        let mut state = self.inner.state.lock();
        if state.waiters.remove(waiter).is_some() {
            return None;
        }
        // Grants are sent under this lock, so the value is already there.
        rx.try_recv().ok()
    }

    fn release_permit(&self, permit: u64) -> Result<(), GateError> {
        let mut state = self.inner.state.lock();
        if !state.outstanding.remove(&permit) {
            drop(state);
            error!(permit, "permit released more than once");
            return Err(GateError::DoubleRelease { permit });
        }
        while let Some(mut entry) = state.waiters.pop_front() {
            let next = state.next_permit;
            if entry.resume(next).is_ok() {
                state.next_permit += 1;
                state.outstanding.insert(next);
                debug!(
                    released = permit,
                    granted = next,
                    waiter = entry.id(),
                    "permit handed to waiter"
                );
                return Ok(());
            }
        }
        state.available += 1;
        debug_assert!(state.available <= self.inner.capacity);
        debug!(permit, available = state.available, "permit released");
        Ok(())
    }
}
