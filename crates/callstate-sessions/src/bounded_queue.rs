//! Bounded queue with a configurable overflow policy.
//!
//! Uses `crossbeam-queue::ArrayQueue` for a lock-free, bounded MPMC queue.
//! When the queue is full the [`OverflowPolicy`] decides which item is lost:
//! the incoming one (`DropNewest`) or the oldest queued one (`DropOldest`).
//! Either way the producer never blocks.

use callstate_types::OverflowPolicy;
use crossbeam_queue::ArrayQueue;

/// Result of pushing onto the queue.
#[derive(Debug, PartialEq, Eq)]
pub enum PushResult<T> {
    /// Item was enqueued.
    Ok,
    /// Queue was full and the incoming item was rejected.
    Rejected(T),
    /// Item was enqueued after evicting the oldest queued item.
    Evicted(T),
}

#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: ArrayQueue<T>,
    policy: OverflowPolicy,
}

impl<T> BoundedQueue<T> {
    /// Creates a new bounded queue.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            inner: ArrayQueue::new(capacity),
            policy,
        }
    }

    pub fn push(&self, item: T) -> PushResult<T> {
        match self.policy {
            OverflowPolicy::DropNewest => match self.inner.push(item) {
                Ok(()) => PushResult::Ok,
                Err(item) => PushResult::Rejected(item),
            },
            OverflowPolicy::DropOldest => match self.inner.force_push(item) {
                None => PushResult::Ok,
                Some(evicted) => PushResult::Evicted(evicted),
            },
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
