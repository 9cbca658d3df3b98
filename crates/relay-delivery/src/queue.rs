//! Bounded FIFO admission queue.
//!
//! The queue absorbs submission bursts between the HTTP surface and the
//! worker pool. Enqueueing is non-blocking and fails fast once the fixed
//! capacity is reached; that rejection is the system's only backpressure
//! mechanism. Dequeueing is cooperative: workers park on a notifier until
//! an item arrives. Tasks come out in submission order, though completion
//! order depends on upstream latency.

use std::collections::VecDeque;

use relay_core::TaskId;
use tokio::sync::{Mutex, Notify};

/// Bounded FIFO queue of pending task identifiers.
///
/// Capacity is fixed at construction; there is no dynamic resizing. The
/// queue holds ids only; the task record itself lives in the store.
#[derive(Debug)]
pub struct AdmissionQueue {
    items: Mutex<VecDeque<TaskId>>,
    notify: Notify,
    capacity: usize,
}

impl AdmissionQueue {
    /// Creates a queue with the given fixed capacity.
    pub fn new(capacity: usize) -> Self {
        Self { items: Mutex::new(VecDeque::with_capacity(capacity)), notify: Notify::new(), capacity }
    }

    /// Attempts to enqueue without blocking.
    ///
    /// Returns `false` when the queue already holds `capacity` items; the
    /// rejected attempt leaves the queue unchanged.
    pub async fn try_enqueue(&self, id: TaskId) -> bool {
        {
            let mut items = self.items.lock().await;
            if items.len() >= self.capacity {
                return false;
            }
            items.push_back(id);
        }
        self.notify.notify_one();
        true
    }

    /// Removes and returns the oldest queued id, waiting if empty.
    ///
    /// Cancel-safe: dropping the future between wake-ups consumes nothing.
    pub async fn dequeue(&self) -> TaskId {
        loop {
            {
                let mut items = self.items.lock().await;
                if let Some(id) = items.pop_front() {
                    return id;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Number of items currently queued.
    pub async fn depth(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Fixed capacity set at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
