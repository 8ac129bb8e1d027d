//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::{Duration, Instant};

// == Cache Entry ==
/// A single cached value with its insertion time and time-to-live.
///
/// Entries are never mutated in place; a re-set overwrites the entry
/// wholesale, resetting the insertion time.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// When the entry was inserted
    pub inserted_at: Instant,
    /// Lifetime after which the entry is treated as absent
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry with the given TTL.
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    // == Is Stale ==
    /// Checks whether the entry's lifetime has elapsed.
    ///
    /// An entry is live iff `now - inserted_at <= ttl`; once stale it
    /// must be treated as absent by every read path.
    pub fn is_stale(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }

    // == Time To Live ==
    /// Returns the remaining lifetime, or zero if the entry is stale.
    pub fn ttl_remaining(&self) -> Duration {
        self.ttl.saturating_sub(self.inserted_at.elapsed())
    }
}
