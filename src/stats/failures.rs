//! Bounded rolling record of failure timestamps.

use std::collections::VecDeque;
use std::sync::Mutex;

/// A bounded, thread-safe FIFO of failure timestamps (milliseconds).
///
/// Inserting beyond capacity evicts the oldest entry, so the window always
/// holds the most recent `capacity` failures. The breaker trips when the
/// window is full *and* its span (newest minus oldest) fits inside the
/// rolling window.
///
/// # Example
///
/// ```rust
/// use circuitbridge::stats::FailureWindow;
///
/// let window = FailureWindow::new(2);
/// window.add(100);
/// window.add(250);
/// window.add(300);
///
/// assert_eq!(window.count(), 2);
/// assert_eq!(window.current_span(), Some(50));
/// ```
#[derive(Debug)]
pub struct FailureWindow {
    capacity: usize,
    timestamps: Mutex<VecDeque<u64>>,
}

impl FailureWindow {
    /// Creates an empty window holding at most `capacity` timestamps.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            timestamps: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Returns the maximum number of timestamps retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a timestamp, evicting the oldest entry when full.
    pub fn add(&self, timestamp: u64) {
        let mut timestamps = self
            .timestamps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if timestamps.len() == self.capacity {
            timestamps.pop_front();
        }
        timestamps.push_back(timestamp);
    }

    /// Returns the number of timestamps currently held.
    pub fn count(&self) -> usize {
        self.timestamps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Returns `true` if no failures are recorded.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Returns `true` if the window holds `capacity` timestamps.
    pub fn is_full(&self) -> bool {
        self.count() >= self.capacity
    }

    /// Time between the oldest and newest entry.
    ///
    /// Returns `None` with fewer than two entries.
    pub fn current_span(&self) -> Option<u64> {
        let timestamps = self
            .timestamps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if timestamps.len() < 2 {
            return None;
        }
        match (timestamps.front(), timestamps.back()) {
            (Some(oldest), Some(newest)) => Some(newest.saturating_sub(*oldest)),
            _ => None,
        }
    }

    /// Returns `true` when the window is full and its span fits in `rolling_window`.
    ///
    /// A single-entry window has no span and counts as dense.
    pub fn exceeds(&self, rolling_window: u64) -> bool {
        let timestamps = self
            .timestamps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if timestamps.len() < self.capacity {
            return false;
        }
        match (timestamps.front(), timestamps.back()) {
            (Some(oldest), Some(newest)) if timestamps.len() >= 2 => {
                newest.saturating_sub(*oldest) <= rolling_window
            }
            _ => true,
        }
    }

    /// Removes every timestamp.
    pub fn clear(&self) {
        self.timestamps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}
