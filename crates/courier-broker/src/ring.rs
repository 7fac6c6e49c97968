// Fixed-capacity replay ring with a drop-oldest overflow policy.
use std::sync::Arc;

use courier_common::Message;

/// Circular buffer holding the most recent messages of one topic.
///
/// Slots are allocated once at construction; `add` is O(1) and never
/// allocates. The ring is not synchronised — the owning topic guards it.
#[derive(Debug)]
pub(crate) struct ReplayRing {
    slots: Box<[Option<Arc<Message>>]>,
    // Index of the oldest entry; the write position is derived from count.
    head: usize,
    count: usize,
}

impl ReplayRing {
    pub(crate) fn new(capacity: usize) -> Self {
        // Capacity is validated by Config; zero here is a programmer error.
        assert!(capacity > 0, "replay ring capacity must be positive");
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            head: 0,
            count: 0,
        }
    }

    /// Append a message, overwriting the oldest entry when full.
    pub(crate) fn add(&mut self, msg: Arc<Message>) {
        let capacity = self.slots.len();
        let tail = (self.head + self.count) % capacity;
        self.slots[tail] = Some(msg);
        if self.count == capacity {
            self.head = (self.head + 1) % capacity;
        } else {
            self.count += 1;
        }
    }

    /// Last `min(n, count)` messages in chronological order (oldest first).
    pub(crate) fn tail_n(&self, n: usize) -> Vec<Arc<Message>> {
        if n == 0 || self.count == 0 {
            return Vec::new();
        }
        let take = n.min(self.count);
        let capacity = self.slots.len();
        let start = (self.head + self.count - take) % capacity;
        (0..take)
            .map(|i| {
                self.slots[(start + i) % capacity]
                    .clone()
                    .expect("occupied ring slot")
            })
            .collect()
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    /// Every present message, chronological order. For observability.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Message>> {
        self.tail_n(self.count)
    }
}
