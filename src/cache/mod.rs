//! Cache Module
//!
//! Provides the bounded in-memory cache with TTL staleness and
//! insertion-age eviction.

mod entry;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::TtlCache;
