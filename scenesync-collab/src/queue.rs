//! Fixed-capacity FIFO shared between network tasks and the tick.
//!
//! Enqueue never blocks: on a full queue the item is dropped and counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::SyncError;

/// Default capacity for every session queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    // A panicking holder cannot leave a VecDeque half-updated.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`, or drop it with [`SyncError::QueueFull`] when the
    /// queue is at capacity.
    pub fn try_enqueue(&self, item: T) -> Result<(), SyncError> {
        let mut items = self.lock();
        if items.len() >= self.capacity {
            drop(items);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(SyncError::QueueFull);
        }
        items.push_back(item);
        Ok(())
    }

    /// Like [`try_enqueue`](Self::try_enqueue); returns false when dropped.
    pub fn enqueue(&self, item: T) -> bool {
        self.try_enqueue(item).is_ok()
    }

    pub fn dequeue(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard everything queued; returns how many items were dropped.
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let n = items.len();
        items.clear();
        n
    }

    /// Items rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_try_enqueue_reports_full_queue() {
        let queue = BoundedQueue::new(1);
        assert!(queue.try_enqueue("a").is_ok());
        assert!(matches!(queue.try_enqueue("b"), Err(SyncError::QueueFull)));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.dequeue(), Some("a"));
        assert!(queue.try_enqueue("c").is_ok());
    }

    #[test]
    fn test_full_queue_drops_new_items() {
        let queue = BoundedQueue::new(20);
        for i in 0..20 {
            assert!(queue.enqueue(i));
        }
        assert!(queue.is_full());
        assert!(!queue.enqueue(20));
        assert_eq!(queue.len(), 20);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_overflow_retains_earliest() {
        let queue = BoundedQueue::new(5);
        for i in 0..50 {
            queue.enqueue(i);
        }
        let drained: Vec<i32> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.dropped(), 45);
    }

    #[test]
    fn test_fifo_and_clear() {
        let queue = BoundedQueue::default();
        assert_eq!(queue.capacity(), DEFAULT_QUEUE_CAPACITY);
        queue.enqueue("a");
        queue.enqueue("b");
        assert_eq!(queue.dequeue(), Some("a"));
        queue.enqueue("c");
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_concurrent_producers_never_exceed_capacity() {
        let queue = Arc::new(BoundedQueue::new(30));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        q.enqueue(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 30);
        assert_eq!(queue.dropped(), 370);
    }
}
