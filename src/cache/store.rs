//! Cache Store Module
//!
//! Bounded TTL cache combining HashMap storage with lazy staleness
//! deletion and insertion-age eviction. Absence is the only failure
//! signal; no operation on the store returns an error.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::cache::{CacheEntry, CacheStats, CacheStatsSnapshot};
use crate::config::CacheConfig;

/// Fraction of entries removed when capacity pressure persists after
/// sweeping stale entries.
const EVICTION_FRACTION: f64 = 0.2;

// == TTL Cache ==
/// Bounded key-value cache with per-entry TTL.
///
/// Eviction is by insertion age, not access recency: when the cache is
/// at capacity and a stale sweep does not free space, the oldest 20% of
/// entries by insertion time are removed. Reads never refresh an
/// entry's age.
#[derive(Debug)]
pub struct TtlCache<V> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<V>>,
    /// Performance counters, fed by explicit record_hit/record_miss calls
    stats: CacheStats,
    /// Maximum number of entries allowed
    max_entries: usize,
    /// TTL for entries stored without an explicit TTL
    default_ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    // == Constructor ==
    /// Creates a new cache from a validated configuration.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::new(),
            max_entries: config.max_entries,
            default_ttl: config.default_ttl,
        }
    }

    // == Set ==
    /// Stores a value with an optional TTL.
    ///
    /// Overwrites wholesale if the key exists, resetting the insertion
    /// time. When the cache is at capacity and the key is new, capacity
    /// is enforced before insertion: stale entries are swept first, and
    /// if that is not enough the oldest 20% by insertion time are
    /// evicted.
    pub fn set(&mut self, key: String, value: V, ttl: Option<Duration>) {
        let is_overwrite = self.entries.contains_key(&key);

        if !is_overwrite && self.entries.len() >= self.max_entries {
            self.enforce_capacity();
        }

        let effective_ttl = ttl.unwrap_or(self.default_ttl);
        self.entries.insert(key, CacheEntry::new(value, effective_ttl));
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// Stale entries are deleted on access and reported as absent.
    /// Reads have no effect on entry age or on the hit/miss counters;
    /// callers instrument hits and misses explicitly.
    pub fn get(&mut self, key: &str) -> Option<V> {
        match self.entries.get(key) {
            Some(entry) if entry.is_stale() => {
                self.entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    // == Delete ==
    /// Removes an entry by key. Returns whether an entry was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    // == Delete Pattern ==
    /// Removes all entries matching a single-`*` wildcard pattern.
    ///
    /// `prefix*`, `*suffix` and `prefix*suffix` forms are supported; a
    /// pattern without `*` deletes the exact key. The wildcard is kept
    /// as a plain substring split rather than a full regex so patterns
    /// derived from user-controlled identifiers stay harmless.
    ///
    /// Returns the number of entries removed.
    pub fn delete_pattern(&mut self, pattern: &str) -> usize {
        let before = self.entries.len();

        match pattern.split_once('*') {
            Some((prefix, suffix)) => {
                self.entries.retain(|key, _| {
                    !(key.len() >= prefix.len() + suffix.len()
                        && key.starts_with(prefix)
                        && key.ends_with(suffix))
                });
            }
            None => {
                self.entries.remove(pattern);
            }
        }

        before - self.entries.len()
    }

    // == Cleanup Expired ==
    /// Removes all stale entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_stale());
        before - self.entries.len()
    }

    // == Stats ==
    /// Records a cache hit on behalf of a caller.
    pub fn record_hit(&mut self) {
        self.stats.record_hit();
    }

    /// Records a cache miss on behalf of a caller.
    pub fn record_miss(&mut self) {
        self.stats.record_miss();
    }

    /// Returns a point-in-time snapshot of size, capacity, staleness
    /// and the accumulated hit/miss counters.
    pub fn stats(&self) -> CacheStatsSnapshot {
        let stale_entries = self.entries.values().filter(|e| e.is_stale()).count();
        CacheStatsSnapshot {
            size: self.entries.len(),
            capacity: self.max_entries,
            stale_entries,
            hits: self.stats.hits,
            misses: self.stats.misses,
            evictions: self.stats.evictions,
            hit_rate: self.stats.hit_rate(),
        }
    }

    // == Length ==
    /// Returns the current number of entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // == Clear ==
    /// Removes every entry, leaving counters intact.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // == Capacity Enforcement ==
    /// Frees space when the cache is full: sweep stale entries first,
    /// then evict the oldest 20% (at least one) by insertion time.
    fn enforce_capacity(&mut self) {
        let swept = self.cleanup_expired();
        if self.entries.len() < self.max_entries {
            if swept > 0 {
                debug!(swept, "capacity pressure relieved by stale sweep");
            }
            return;
        }

        let evict_count = ((self.entries.len() as f64 * EVICTION_FRACTION).ceil() as usize).max(1);

        let mut by_age: Vec<(String, std::time::Instant)> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.inserted_at))
            .collect();
        by_age.sort_by_key(|(_, inserted_at)| *inserted_at);

        for (key, _) in by_age.into_iter().take(evict_count) {
            self.entries.remove(&key);
        }

        self.stats.record_evictions(evict_count as u64);
        debug!(evicted = evict_count, "evicted oldest entries at capacity");
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn test_cache(max_entries: usize) -> TtlCache<String> {
        TtlCache::new(&CacheConfig {
            max_entries,
            default_ttl: Duration::from_secs(300),
        })
    }

    #[test]
    fn test_store_set_and_get() {
        let mut cache = test_cache(100);

        cache.set("key1".to_string(), "value1".to_string(), None);
        assert_eq!(cache.get("key1"), Some("value1".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let mut cache = test_cache(100);
        assert_eq!(cache.get("nonexistent"), None);
    }

    #[test]
    fn test_store_overwrite() {
        let mut cache = test_cache(100);

        cache.set("key1".to_string(), "value1".to_string(), None);
        cache.set("key1".to_string(), "value2".to_string(), None);

        assert_eq!(cache.get("key1"), Some("value2".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_store_delete() {
        let mut cache = test_cache(100);

        cache.set("key1".to_string(), "value1".to_string(), None);
        assert!(cache.delete("key1"));
        assert!(!cache.delete("key1"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_ttl_expiration() {
        let mut cache = test_cache(100);

        cache.set(
            "key1".to_string(),
            "value1".to_string(),
            Some(Duration::from_millis(30)),
        );
        assert!(cache.get("key1").is_some());

        sleep(Duration::from_millis(50));

        assert_eq!(cache.get("key1"), None);
        // Lazy deletion removed the stale entry on access
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_capacity_bound_holds() {
        let mut cache = test_cache(5);

        for i in 0..20 {
            cache.set(format!("key{}", i), "v".to_string(), None);
            assert!(cache.len() <= 5, "size {} exceeds capacity", cache.len());
        }
    }

    #[test]
    fn test_store_evicts_oldest_by_insertion() {
        let mut cache = test_cache(5);

        for i in 0..5 {
            cache.set(format!("key{}", i), "v".to_string(), None);
            // Distinct insertion times so age ordering is unambiguous
            sleep(Duration::from_millis(2));
        }

        // At capacity: the next insert evicts ceil(5 * 0.2) = 1 oldest entry
        cache.set("key5".to_string(), "v".to_string(), None);

        assert_eq!(cache.get("key0"), None, "oldest entry should be evicted");
        assert!(cache.get("key4").is_some());
        assert!(cache.get("key5").is_some());
    }

    #[test]
    fn test_store_reads_do_not_refresh_age() {
        let mut cache = test_cache(5);

        for i in 0..5 {
            cache.set(format!("key{}", i), "v".to_string(), None);
            sleep(Duration::from_millis(2));
        }

        // Reading the oldest entry must not protect it: eviction is by
        // insertion time, not access recency.
        assert!(cache.get("key0").is_some());
        cache.set("key5".to_string(), "v".to_string(), None);

        assert_eq!(cache.get("key0"), None);
    }

    #[test]
    fn test_store_stale_sweep_relieves_capacity() {
        let mut cache = test_cache(3);

        cache.set(
            "short".to_string(),
            "v".to_string(),
            Some(Duration::from_millis(20)),
        );
        cache.set("keep1".to_string(), "v".to_string(), None);
        cache.set("keep2".to_string(), "v".to_string(), None);

        sleep(Duration::from_millis(40));

        // The stale entry is swept instead of evicting a live one
        cache.set("new".to_string(), "v".to_string(), None);

        assert!(cache.get("keep1").is_some());
        assert!(cache.get("keep2").is_some());
        assert!(cache.get("new").is_some());
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_delete_pattern_prefix() {
        let mut cache = test_cache(100);

        cache.set("patient:1".to_string(), "a".to_string(), None);
        cache.set("patient:1:appointments".to_string(), "b".to_string(), None);
        cache.set("patient:2".to_string(), "c".to_string(), None);

        let removed = cache.delete_pattern("patient:1*");

        assert_eq!(removed, 2);
        assert!(cache.get("patient:1").is_none());
        assert!(cache.get("patient:1:appointments").is_none());
        assert!(cache.get("patient:2").is_some());
    }

    #[test]
    fn test_delete_pattern_suffix() {
        let mut cache = test_cache(100);

        cache.set("patient:1:exercises".to_string(), "a".to_string(), None);
        cache.set("patient:2:exercises".to_string(), "b".to_string(), None);
        cache.set("patient:2:notes".to_string(), "c".to_string(), None);

        let removed = cache.delete_pattern("*:exercises");

        assert_eq!(removed, 2);
        assert!(cache.get("patient:2:notes").is_some());
    }

    #[test]
    fn test_delete_pattern_infix() {
        let mut cache = test_cache(100);

        cache.set("dash:today:summary".to_string(), "a".to_string(), None);
        cache.set("dash:week:summary".to_string(), "b".to_string(), None);
        cache.set("dash:today:detail".to_string(), "c".to_string(), None);

        let removed = cache.delete_pattern("dash:*:summary");

        assert_eq!(removed, 2);
        assert!(cache.get("dash:today:detail").is_some());
    }

    #[test]
    fn test_delete_pattern_exact_without_wildcard() {
        let mut cache = test_cache(100);

        cache.set("exact".to_string(), "a".to_string(), None);
        cache.set("exact:child".to_string(), "b".to_string(), None);

        let removed = cache.delete_pattern("exact");

        assert_eq!(removed, 1);
        assert!(cache.get("exact:child").is_some());
    }

    #[test]
    fn test_delete_pattern_no_false_overlap() {
        let mut cache = test_cache(100);

        // "ab" must not match "a*b" via overlapping prefix/suffix
        cache.set("ab".to_string(), "v".to_string(), None);

        let removed = cache.delete_pattern("a*b");

        assert_eq!(removed, 1); // len("ab") == len("a") + len("b"), legitimate match
        cache.set("ab".to_string(), "v".to_string(), None);
        assert_eq!(cache.delete_pattern("ab*ab"), 0, "overlap must not match");
    }

    #[test]
    fn test_cleanup_expired() {
        let mut cache = test_cache(100);

        cache.set(
            "key1".to_string(),
            "v".to_string(),
            Some(Duration::from_millis(20)),
        );
        cache.set(
            "key2".to_string(),
            "v".to_string(),
            Some(Duration::from_secs(10)),
        );

        sleep(Duration::from_millis(40));

        let removed = cache.cleanup_expired();
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("key2").is_some());
    }

    #[test]
    fn test_stats_snapshot() {
        let mut cache = test_cache(100);

        cache.set("key1".to_string(), "v".to_string(), None);
        cache.record_hit();
        cache.record_miss();

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 100);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn test_stats_counts_stale_unswept() {
        let mut cache = test_cache(100);

        cache.set(
            "stale".to_string(),
            "v".to_string(),
            Some(Duration::from_millis(20)),
        );
        cache.set("fresh".to_string(), "v".to_string(), None);

        sleep(Duration::from_millis(40));

        let stats = cache.stats();
        assert_eq!(stats.size, 2, "stale entry not yet swept");
        assert_eq!(stats.stale_entries, 1);
    }
}
