use std::collections::VecDeque;

use agora_core::ids::MessageId;

/// Bounded FIFO that reports the moment it first becomes full.
///
/// `push` returns true only on the append that takes the length from
/// `capacity - 1` to `capacity`. Appending to a full buffer evicts the
/// oldest entry and does not report again; the owner is expected to
/// [`drain`](Self::drain) after acting on a full window.
#[derive(Debug)]
pub struct SlidingWindowBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> SlidingWindowBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) -> bool {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.entries.push_back(entry);
            return false;
        }
        self.entries.push_back(entry);
        self.entries.len() == self.capacity
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.entries.drain(..).collect()
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

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

/// Counts messages and remembers their ids until a threshold is reached.
#[derive(Debug)]
pub struct ThresholdCounter {
    count: usize,
    ids: Vec<MessageId>,
    threshold: usize,
}

impl ThresholdCounter {
    pub fn new(threshold: usize) -> Self {
        Self {
            count: 0,
            ids: Vec::new(),
            threshold: threshold.max(1),
        }
    }

    /// Record one message. When the threshold is reached, returns the
    /// accumulated ids and resets the counter and id list together.
    pub fn record(&mut self, id: MessageId) -> Option<Vec<MessageId>> {
        self.count += 1;
        self.ids.push(id);
        if self.count < self.threshold {
            return None;
        }
        self.count = 0;
        Some(std::mem::take(&mut self.ids))
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn ids(&self) -> &[MessageId] {
        &self.ids
    }
}
