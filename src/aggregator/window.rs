//! Bounded window of the most recent readings
//!
//! Batches are appended at the back and the oldest readings are evicted from
//! the front until the window fits its capacity again.

use crate::aggregator::daily::{summarize, FieldStats};
use crate::readings::Reading;
use std::collections::VecDeque;

/// Default number of readings kept for live display
pub const DEFAULT_WINDOW_SIZE: usize = 20;

/// Fixed-capacity FIFO of recent readings
#[derive(Debug, Clone)]
pub struct RecentWindow {
    buffer: VecDeque<Reading>,
    capacity: usize,
}

impl RecentWindow {
    /// Create an empty window holding at most `capacity` readings
    ///
    /// # Examples
    ///
    /// ```
    /// use vitals::aggregator::RecentWindow;
    ///
    /// let window = RecentWindow::new(20);
    /// assert!(window.is_empty());
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a batch and evict from the front until within capacity
    ///
    /// Returns the number of readings evicted.
    pub fn push_batch<I>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = Reading>,
    {
        self.buffer.extend(batch);
        self.enforce_capacity()
    }

    /// Readings currently held, oldest first
    pub fn readings(&self) -> Vec<Reading> {
        self.buffer.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Heart rate statistics over the window, `None` when empty
    pub fn heart_rate_stats(&self) -> Option<FieldStats> {
        let values: Vec<f64> = self.buffer.iter().map(|r| r.heart_rate).collect();
        summarize(&values)
    }

    /// SpO2 statistics over the window, `None` when empty
    pub fn spo2_stats(&self) -> Option<FieldStats> {
        let values: Vec<f64> = self.buffer.iter().map(|r| r.spo2).collect();
        summarize(&values)
    }

    fn enforce_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
            evicted += 1;
        }
        evicted
    }
}

impl Default for RecentWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
