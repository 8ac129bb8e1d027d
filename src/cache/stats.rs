//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.
//!
//! The cache does not instrument its own `get`; hits and misses are
//! recorded explicitly by callers, so the ratio reflects the semantics
//! the caller cares about rather than internal probing.

use serde::Serialize;

// == Cache Stats ==
/// Accumulated cache performance counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of recorded cache hits
    pub hits: u64,
    /// Number of recorded cache misses
    pub misses: u64,
    /// Number of entries removed by capacity-driven eviction
    pub evictions: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if nothing was recorded.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    // == Record Hit ==
    /// Increments the hit counter.
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    // == Record Miss ==
    /// Increments the miss counter.
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    // == Record Eviction ==
    /// Adds to the eviction counter.
    pub fn record_evictions(&mut self, count: u64) {
        self.evictions += count;
    }
}

// == Stats Snapshot ==
/// Point-in-time view of the cache returned by `TtlCache::stats`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    /// Current number of entries, stale ones included
    pub size: usize,
    /// Hard capacity bound
    pub capacity: usize,
    /// Entries whose TTL has elapsed but which have not been swept yet
    pub stale_entries: usize,
    /// Recorded hits
    pub hits: u64,
    /// Recorded misses
    pub misses: u64,
    /// Capacity-driven evictions
    pub evictions: u64,
    /// hits / (hits + misses)
    pub hit_rate: f64,
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStats::new();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_all_hits() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_hit();
        assert_eq!(stats.hit_rate(), 1.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_record_evictions() {
        let mut stats = CacheStats::new();
        stats.record_evictions(3);
        stats.record_evictions(2);
        assert_eq!(stats.evictions, 5);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = CacheStatsSnapshot {
            size: 10,
            capacity: 100,
            stale_entries: 2,
            hits: 7,
            misses: 3,
            evictions: 1,
            hit_rate: 0.7,
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["size"], 10);
        assert_eq!(json["capacity"], 100);
        assert_eq!(json["hit_rate"], 0.7);
    }
}
