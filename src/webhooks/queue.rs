//! Delivery queue: a FIFO of ready items plus a min-heap of scheduled retries.
//!
//! Retries never bypass the queue. When a retry becomes due it is promoted to
//! the tail of the FIFO, so the single processor sees items in the order they
//! became ready.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::types::DeliveryItem;

struct ScheduledRetry {
    due: Instant,
    seq: u64,
    item: DeliveryItem,
}

impl PartialEq for ScheduledRetry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledRetry {}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRetry {
    // Reversed so the BinaryHeap pops the earliest due time first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<DeliveryItem>,
    retries: BinaryHeap<ScheduledRetry>,
    next_seq: u64,
}

/// Unbounded in-memory delivery queue shared by dispatcher and processor.
#[derive(Clone)]
pub struct DeliveryQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl DeliveryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Append a ready item. The processor sees it on its next wake-up or
    /// poll tick; call [`wake`](Self::wake) to deliver it promptly.
    pub async fn enqueue(&self, item: DeliveryItem) {
        self.state.lock().await.ready.push_back(item);
    }

    /// Wake the processor.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Pop the head of the ready FIFO.
    pub async fn pop(&self) -> Option<DeliveryItem> {
        self.state.lock().await.ready.pop_front()
    }

    /// Park an item until `due`.
    pub async fn schedule_retry(&self, item: DeliveryItem, due: Instant) {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.retries.push(ScheduledRetry { due, seq, item });
        drop(state);
        self.notify.notify_one();
    }

    /// Move every retry due at or before `now` to the tail of the FIFO.
    /// Returns how many were promoted.
    pub async fn promote_due(&self, now: Instant) -> usize {
        let mut state = self.state.lock().await;
        let mut promoted = 0;
        while state.retries.peek().is_some_and(|r| r.due <= now) {
            if let Some(retry) = state.retries.pop() {
                state.ready.push_back(retry.item);
                promoted += 1;
            }
        }
        promoted
    }

    /// Earliest pending retry time, if any.
    pub async fn next_due(&self) -> Option<Instant> {
        self.state.lock().await.retries.peek().map(|r| r.due)
    }

    /// Items ready for delivery.
    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Retries waiting on their backoff.
    pub async fn scheduled_len(&self) -> usize {
        self.state.lock().await.retries.len()
    }

    /// Whether nothing is ready or scheduled.
    pub async fn is_empty(&self) -> bool {
        let state = self.state.lock().await;
        state.ready.is_empty() && state.retries.is_empty()
    }

    /// Wait for a wake-up or a newly scheduled retry.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}
