//! Ordered holder of pending acquisition requests.
//!
//! A [`WaitQueue`] has no admission policy of its own. Gates push an entry when
//! a caller has to suspend, and later resume the entry by sending a grant value
//! through its one-shot channel. Entries are kept in admission order:
//! descending [`Priority`], and submission order within a priority. When every
//! entry uses the default priority the queue is plain FIFO.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::util::serde::Priority;

/// Identifier of a queued acquisition request, unique per queue.
pub type WaiterId = u64;

/// A queued acquisition request.
#[derive(Debug)]
pub struct WaitEntry<G> {
    id: WaiterId,
    priority: Priority,
    enqueued_at: Instant,
    resume: Option<oneshot::Sender<G>>,
}

impl<G> WaitEntry<G> {
    /// Identifier assigned on enqueue.
    #[must_use]
    pub const fn id(&self) -> WaiterId {
        self.id
    }

    /// Priority the entry was enqueued with.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// When the entry was enqueued.
    #[must_use]
    pub const fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Resume the suspended caller with `grant`.
    ///
    /// Returns the grant back if the caller has gone away or the entry was
    /// already resumed, so the gate can hand it to someone else.
    pub fn resume(&mut self, grant: G) -> Result<(), G> {
        match self.resume.take() {
            Some(tx) => tx.send(grant),
            None => Err(grant),
        }
    }

    /// True once the entry has been resumed.
    #[must_use]
    pub const fn is_resumed(&self) -> bool {
        self.resume.is_none()
    }
}

/// Ordered queue of [`WaitEntry`] values.
#[derive(Debug)]
pub struct WaitQueue<G> {
    entries: VecDeque<WaitEntry<G>>,
    next_id: WaiterId,
}

impl<G> Default for WaitQueue<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G> WaitQueue<G> {
    /// Create an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 0,
        }
    }

    /// Enqueue a request at normal priority.
    pub fn push(&mut self) -> (WaiterId, oneshot::Receiver<G>) {
        self.push_with_priority(Priority::Normal)
    }

    /// Enqueue a request, placing it after every entry of equal or higher
    /// priority.
    pub fn push_with_priority(&mut self, priority: Priority) -> (WaiterId, oneshot::Receiver<G>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id;
        self.next_id += 1;
        let entry = WaitEntry {
            id,
            priority,
            enqueued_at: Instant::now(),
            resume: Some(tx),
        };

        let tail_ranks_higher = self
            .entries
            .back()
            .is_none_or(|last| last.priority >= priority);
        if tail_ranks_higher {
            self.entries.push_back(entry);
        } else {
            let at = self
                .entries
                .iter()
                .position(|e| e.priority < priority)
                .unwrap_or(self.entries.len());
            self.entries.insert(at, entry);
        }
        (id, rx)
    }

    /// Remove and return the oldest highest-priority entry.
    pub fn pop_front(&mut self) -> Option<WaitEntry<G>> {
        self.entries.pop_front()
    }

    /// Borrow the entry that would be granted next.
    pub fn front_mut(&mut self) -> Option<&mut WaitEntry<G>> {
        self.entries.front_mut()
    }

    /// Identifier of the entry that would be granted next.
    #[must_use]
    pub fn front_id(&self) -> Option<WaiterId> {
        self.entries.front().map(|e| e.id)
    }

    /// Remove a specific entry. Returns `None` if it is no longer queued.
    pub fn remove(&mut self, id: WaiterId) -> Option<WaitEntry<G>> {
        let at = self.entries.iter().position(|e| e.id == id)?;
        self.entries.remove(at)
    }

    /// Whether an entry is still queued.
    #[must_use]
    pub fn contains(&self, id: WaiterId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut q = WaitQueue::<u32>::new();
        let (a, _ra) = q.push();
        let (b, _rb) = q.push();
        let (c, _rc) = q.push();

        assert_eq!(q.pop_front().map(|e| e.id()), Some(a));
        assert_eq!(q.pop_front().map(|e| e.id()), Some(b));
        assert_eq!(q.pop_front().map(|e| e.id()), Some(c));
        assert!(q.pop_front().is_none());
    }

    #[test]
    fn test_priority_is_stable() {
        let mut q = WaitQueue::<u32>::new();
        let (low, _r1) = q.push_with_priority(Priority::Low);
        let (n1, _r2) = q.push_with_priority(Priority::Normal);
        let (crit, _r3) = q.push_with_priority(Priority::Critical);
        let (n2, _r4) = q.push_with_priority(Priority::Normal);
        let (high, _r5) = q.push_with_priority(Priority::High);

        let order: Vec<_> = std::iter::from_fn(|| q.pop_front().map(|e| e.id())).collect();
        assert_eq!(order, vec![crit, high, n1, n2, low]);
    }

    #[test]
    fn test_remove_specific_entry() {
        let mut q = WaitQueue::<u32>::new();
        let (a, _ra) = q.push();
        let (b, _rb) = q.push();
        let (c, _rc) = q.push();

        assert!(q.remove(b).is_some());
        assert!(q.remove(b).is_none());
        assert!(!q.contains(b));
        assert_eq!(q.len(), 2);
        assert_eq!(q.front_id(), Some(a));
        q.pop_front();
        assert_eq!(q.front_id(), Some(c));
    }

    #[test]
    fn test_resume_delivers_grant_once() {
        let mut q = WaitQueue::<u32>::new();
        let (_, mut rx) = q.push();
        let mut entry = q.pop_front().unwrap();

        assert!(entry.resume(7).is_ok());
        assert!(entry.is_resumed());
        assert_eq!(entry.resume(8), Err(8));
        assert_eq!(rx.try_recv().unwrap(), 7);
    }

    #[test]
    fn test_resume_after_receiver_dropped_returns_grant() {
        let mut q = WaitQueue::<u32>::new();
        let (_, rx) = q.push();
        drop(rx);
        let mut entry = q.pop_front().unwrap();
        assert_eq!(entry.resume(1), Err(1));
    }
}
