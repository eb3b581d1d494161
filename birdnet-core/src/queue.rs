//! Bounded drop-oldest queue shared by the windower→inferencer frame channel
//! and the inferencer's shared work queue (SPEC_FULL §4.3/§4.4): "On channel
//! full, drop the oldest enqueued frame and increment a counter."
//!
//! Generalizes the teacher's `PipelineDiagnostics` atomic-counter pattern
//! (`dictum-core/src/engine/pipeline.rs`) to a reusable bounded queue type,
//! since the teacher's pipeline has no fan-in/fan-out queue of its own —
//! frames there flow through a single `ringbuf` consumer, not a multi-stage
//! channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

pub struct DropOldestQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    dropped_total: AtomicU64,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Push an item, dropping the oldest queued item if at capacity. Returns
    /// `true` if an item was dropped to make room.
    pub fn push(&self, item: T) -> bool {
        let dropped = {
            let mut guard = self.inner.lock();
            let dropped = if guard.len() >= self.capacity {
                guard.pop_front();
                true
            } else {
                false
            };
            guard.push_back(item);
            dropped
        };
        if dropped {
            self.dropped_total.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        dropped
    }

    /// Await the next item, waking whenever a push occurs.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.inner.lock().pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_under_capacity_never_drops() {
        let q: DropOldestQueue<i32> = DropOldestQueue::new(2);
        assert!(!q.push(1));
        assert!(!q.push(2));
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped_total(), 0);
    }

    #[test]
    fn push_over_capacity_drops_oldest() {
        let q: DropOldestQueue<i32> = DropOldestQueue::new(2);
        q.push(1);
        q.push(2);
        assert!(q.push(3));
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), Some(3));
        assert_eq!(q.dropped_total(), 1);
    }

    #[tokio::test]
    async fn pop_waits_for_a_push() {
        let q = std::sync::Arc::new(DropOldestQueue::<i32>::new(4));
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.pop().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        q.push(42);
        assert_eq!(handle.await.unwrap(), 42);
    }
}
