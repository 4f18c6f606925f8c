//! Fixed-capacity quote history

use std::collections::VecDeque;

use arb_core::{QuoteSnapshot, HISTORY_CAPACITY};

/// FIFO ring buffer of snapshots in arrival order.
///
/// Appending at capacity evicts the oldest entry in the same call.
#[derive(Debug, Clone)]
pub struct QuoteHistory {
    entries: VecDeque<QuoteSnapshot>,
    capacity: usize,
}

impl QuoteHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, returning the evicted snapshot if the buffer was full
    pub fn push(&mut self, snapshot: QuoteSnapshot) -> Option<QuoteSnapshot> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(snapshot);
        debug_assert!(self.entries.len() <= self.capacity);
        evicted
    }

    pub fn latest(&self) -> Option<&QuoteSnapshot> {
        self.entries.back()
    }

    pub fn oldest(&self) -> Option<&QuoteSnapshot> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuoteSnapshot> {
        self.entries.iter()
    }

    /// Owned copy, oldest first
    pub fn to_vec(&self) -> Vec<QuoteSnapshot> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for QuoteHistory {
    fn default() -> Self {
        Self::new()
    }
}
