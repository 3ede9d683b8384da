//! Bounded rolling history of time-tagged samples.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;

/// Which history buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryKind {
    /// Vehicle depth below the surface.
    RovDepth,
    /// Echo-sounder depth below the boat.
    DepthBeneathBoat,
}

/// One recorded value with the local wall-clock time it was written.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Local time of the write.
    pub time: DateTime<Local>,
    /// Recorded value.
    pub value: f64,
}

/// FIFO buffer that never holds more than `capacity` items; the oldest goes first.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> HistoryBuffer<T> {
    /// Empty buffer with a fixed capacity. A capacity of 0 records nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting from the front until the new item fits.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently held.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Most recent item.
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Copy out, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let mut buf = HistoryBuffer::new(3);
        for i in 0..5 {
            buf.push(i);
            assert!(buf.len() <= 3);
        }
        assert_eq!(buf.snapshot(), vec![2, 3, 4]);
        assert_eq!(buf.latest(), Some(&4));
    }

    #[test]
    fn zero_capacity_records_nothing() {
        let mut buf = HistoryBuffer::new(0);
        buf.push(1.0);
        assert!(buf.is_empty());
    }
}
