//! Request Optimizer - an in-process request optimization layer
//!
//! Sits between application code and a slow, failure-prone backend fetch
//! and composes four guarantees: bounded-lifetime caching, single-flight
//! deduplication, adaptive debouncing and sliding-window rate limiting.

pub mod batch;
pub mod cache;
pub mod config;
pub mod debounce;
pub mod error;
pub mod flight;
pub mod optimizer;
pub mod ratelimit;
pub mod tasks;

pub use batch::BatchCoalescer;
pub use cache::{CacheStats, CacheStatsSnapshot, TtlCache};
pub use config::{
    AdaptiveConfig, BatchConfig, CacheConfig, DebounceConfig, DebounceMode, DedupeConfig,
    OptimizerConfig, RateLimitConfig,
};
pub use debounce::{AdaptiveDebouncer, AdaptiveOutcome, DebounceOutcome, Debouncer};
pub use error::{ConfigError, FetchError, FetchResult};
pub use flight::{FlightStats, SingleFlight};
pub use optimizer::{OptimizedResponse, RequestOptimizer, RequestOptions};
pub use ratelimit::SlidingWindowLimiter;
pub use tasks::spawn_sweep_task;
