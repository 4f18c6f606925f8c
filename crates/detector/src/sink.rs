//! Opportunity sink
//!
//! Bounded hand-off between the scanner and the downstream consumer. When
//! full, the oldest queued opportunity is dropped; the scanner never blocks.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::warn;

use arb_core::Opportunity;

#[derive(Debug, Default)]
struct SinkQueue {
    items: VecDeque<Opportunity>,
    closed: bool,
}

/// Bounded drop-oldest queue of opportunities
#[derive(Debug)]
pub struct OpportunitySink {
    queue: Mutex<SinkQueue>,
    notify: Notify,
    capacity: usize,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl OpportunitySink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(SinkQueue {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking; returns `false` once the sink is closed
    pub fn push(&self, opportunity: Opportunity) -> bool {
        {
            let mut queue = self.queue.lock();
            if queue.closed {
                return false;
            }
            if queue.items.len() >= self.capacity {
                if let Some(evicted) = queue.items.pop_front() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(id = %evicted.id, path = %evicted.path(), "Sink full, dropped oldest opportunity");
                }
            }
            queue.items.push_back(opportunity);
        }
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        true
    }

    /// Next opportunity; `None` once closed and drained
    pub async fn recv(&self) -> Option<Opportunity> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queue = self.queue.lock();
                if let Some(item) = queue.items.pop_front() {
                    return Some(item);
                }
                if queue.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    pub fn try_recv(&self) -> Option<Opportunity> {
        self.queue.lock().items.pop_front()
    }

    /// Stop accepting; queued items stay available to `recv`
    pub fn close(&self) {
        self.queue.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }

    pub fn len(&self) -> usize {
        self.queue.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
