//! Event Scheduler.
//!
//! A time-ordered queue of pending work:
//! 1. **Ordering:** Entries fire in increasing cycle order.
//! 2. **Zero delay:** An entry scheduled for the current cycle runs later in that
//!    same cycle, after every entry already queued for it (FIFO by sequence number).
//! 3. **Time:** The clock only moves forward, and only when the caller advances it.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(Debug)]
struct Entry<T> {
    time: u64,
    seq: u64,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.seq) == (other.time, other.seq)
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

/// Min-heap of `(cycle, sequence)`-ordered payloads.
#[derive(Debug)]
pub struct EventQueue<T> {
    now: u64,
    seq: u64,
    heap: BinaryHeap<Reverse<Entry<T>>>,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventQueue<T> {
    /// Creates an empty queue at cycle 0.
    pub fn new() -> Self {
        Self {
            now: 0,
            seq: 0,
            heap: BinaryHeap::new(),
        }
    }

    /// Current cycle.
    #[inline]
    pub const fn now(&self) -> u64 {
        self.now
    }

    /// Queues `payload` to fire `delay` cycles from now.
    pub fn schedule(&mut self, payload: T, delay: u64) {
        let time = self.now + delay;
        self.seq += 1;
        tracing::trace!(time, seq = self.seq, "event scheduled");
        self.heap.push(Reverse(Entry {
            time,
            seq: self.seq,
            payload,
        }));
    }

    /// Pops the next entry due at or before the current cycle.
    pub fn pop_due(&mut self) -> Option<T> {
        if self.heap.peek().is_some_and(|Reverse(e)| e.time <= self.now) {
            self.heap.pop().map(|Reverse(e)| e.payload)
        } else {
            None
        }
    }

    /// Cycle of the earliest queued entry.
    pub fn next_time(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(e)| e.time)
    }

    /// Moves the clock forward to `cycle` (never backwards).
    pub fn advance_to(&mut self, cycle: u64) {
        self.now = self.now.max(cycle);
    }

    /// Number of queued entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
