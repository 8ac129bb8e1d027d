//! Sliding-Window Rate Limiter Module
//!
//! Bounds admitted calls per key over a continuously recomputed trailing
//! window. Unlike a fixed-bucket counter, a burst straddling a window
//! boundary cannot double the effective rate: every admission check
//! prunes timestamps older than the window before counting.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

// == Sliding Window Limiter ==
/// Per-key call-timestamp ledger with a hard admission budget.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    /// Call timestamps per key, oldest first
    windows: HashMap<String, VecDeque<Instant>>,
    /// Maximum admitted calls per key within the window
    max_requests: usize,
    /// Trailing window length
    window: Duration,
}

impl SlidingWindowLimiter {
    // == Constructor ==
    /// Creates a new limiter from a validated configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: HashMap::new(),
            max_requests: config.max_requests,
            window: config.window,
        }
    }

    // == Can Make Request ==
    /// Admission check: prunes out-of-window timestamps, then admits and
    /// records the call iff the in-window count is below the budget.
    /// Admission order matches call order.
    pub fn can_make_request(&mut self, key: &str) -> bool {
        let now = Instant::now();
        let timestamps = self.windows.entry(key.to_string()).or_default();
        Self::prune_window(timestamps, now, self.window);

        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    // == Remaining Requests ==
    /// Returns how much of the key's budget is left in the current
    /// window, without recording a call.
    pub fn remaining_requests(&mut self, key: &str) -> usize {
        let now = Instant::now();
        match self.windows.get_mut(key) {
            Some(timestamps) => {
                Self::prune_window(timestamps, now, self.window);
                self.max_requests - timestamps.len()
            }
            None => self.max_requests,
        }
    }

    // == Prune ==
    /// Drops out-of-window timestamps everywhere and forgets keys whose
    /// windows emptied. Used by the periodic sweep to bound memory.
    pub fn prune(&mut self) -> usize {
        let now = Instant::now();
        let window = self.window;
        let before: usize = self.windows.values().map(VecDeque::len).sum();

        for timestamps in self.windows.values_mut() {
            Self::prune_window(timestamps, now, window);
        }
        self.windows.retain(|_, timestamps| !timestamps.is_empty());

        before - self.windows.values().map(VecDeque::len).sum::<usize>()
    }

    /// Returns the number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Removes timestamps older than the window. Timestamps are pushed
    /// in call order, so pruning pops from the front only.
    fn prune_window(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) > window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}
