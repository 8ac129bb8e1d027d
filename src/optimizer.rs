//! Optimized-Request Orchestrator Module
//!
//! Composes the rate limiter, cache, single-flight coalescer and
//! debouncer to answer one logical "get this resource, optimally" call.
//! The ordering is deliberate: rate limiting is the outermost guard,
//! caching the fastest path, and dedup + debounce only matter on the
//! slow path where they protect the backend from duplicate and bursty
//! misses.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheStatsSnapshot, TtlCache};
use crate::config::OptimizerConfig;
use crate::debounce::{AdaptiveDebouncer, AdaptiveOutcome, DebounceOutcome, Debouncer};
use crate::error::{ConfigError, FetchResult};
use crate::flight::{FlightStats, SingleFlight};
use crate::ratelimit::SlidingWindowLimiter;
use crate::tasks::spawn_sweep_task;

// == Request Options ==
/// Per-call overrides. Everything else is constructor-injected through
/// `OptimizerConfig`.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// TTL for the cached result, overriding the cache default
    pub ttl: Option<Duration>,
}

// == Optimized Response ==
/// A resolved request plus how it was satisfied.
#[derive(Debug, Clone)]
pub struct OptimizedResponse<V> {
    /// The value, from cache or upstream
    pub data: V,
    /// Whether the value came from the cache
    pub cache_hit: bool,
    /// Whether the debounce path was taken
    pub debounced: bool,
    /// Whether the caller was over its rate budget
    pub rate_limited: bool,
}

// == Debounce Policy ==
/// Which debounce variant the orchestrator routes misses through.
enum DebouncePolicy<V> {
    Off,
    Fixed(Arc<Debouncer>),
    Adaptive(Arc<AdaptiveDebouncer<V>>),
}

// == Request Optimizer ==
/// The composed request-optimization layer.
///
/// The backend fetch is an opaque asynchronous collaborator supplied per
/// call; this layer only decides *when* to invoke it. Upstream errors
/// pass through untouched and are never cached.
pub struct RequestOptimizer<V: Clone + Send + Sync + 'static> {
    cache: Arc<RwLock<TtlCache<V>>>,
    flights: Arc<SingleFlight<V>>,
    limiter: Arc<RwLock<SlidingWindowLimiter>>,
    policy: DebouncePolicy<V>,
    config: OptimizerConfig,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Clone + Send + Sync + 'static> RequestOptimizer<V> {
    // == Constructor ==
    /// Builds the optimizer from a configuration, validating every
    /// component setting up front. When both debounce policies are
    /// configured the adaptive one takes precedence.
    pub fn new(config: OptimizerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let cache = Arc::new(RwLock::new(TtlCache::new(&config.cache)));
        let flights = Arc::new(SingleFlight::new(&config.dedupe));
        let limiter = Arc::new(RwLock::new(SlidingWindowLimiter::new(&config.rate_limit)));

        let policy = if let Some(adaptive) = &config.adaptive {
            DebouncePolicy::Adaptive(Arc::new(AdaptiveDebouncer::new(
                adaptive,
                Arc::clone(&cache),
            )))
        } else if let Some(debounce) = &config.debounce {
            DebouncePolicy::Fixed(Arc::new(Debouncer::new(debounce)))
        } else {
            DebouncePolicy::Off
        };

        info!(
            max_entries = config.cache.max_entries,
            rate_limit = config.rate_limit.max_requests,
            "request optimizer initialized"
        );

        Ok(Self {
            cache,
            flights,
            limiter,
            policy,
            config,
            sweep_handle: Mutex::new(None),
        })
    }

    // == Optimized Request ==
    /// Resolves `key` through the full optimization pipeline with
    /// default options.
    pub async fn optimized_request<F, Fut>(
        &self,
        key: &str,
        fetch: F,
    ) -> FetchResult<OptimizedResponse<V>>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        self.optimized_request_with(key, fetch, RequestOptions::default())
            .await
    }

    /// Resolves `key` through the full optimization pipeline.
    ///
    /// 1. Over the rate budget: serve the cached value if live, else run
    ///    one direct fetch (no dedupe, no debounce) and cache it.
    /// 2. Cache hit: return immediately.
    /// 3. Miss: route the fetch through the single-flight coalescer and,
    ///    when configured, the debouncer; cache the settled value.
    pub async fn optimized_request_with<F, Fut>(
        &self,
        key: &str,
        fetch: F,
        options: RequestOptions,
    ) -> FetchResult<OptimizedResponse<V>>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        // Outermost guard: protect the backend even when the cache is cold
        let admitted = self.limiter.write().await.can_make_request(key);
        if !admitted {
            warn!(key, "rate budget exhausted, degrading to cache");
            return self.serve_rate_limited(key, fetch, &options).await;
        }

        // Fastest path
        if let Some(data) = self.cache_lookup(key).await {
            return Ok(OptimizedResponse {
                data,
                cache_hit: true,
                debounced: false,
                rate_limited: false,
            });
        }

        // Slow path: dedupe, maybe debounce, then cache the result
        let max_age = self.config.dedupe.max_age;
        let (data, debounced, already_cached) = match &self.policy {
            DebouncePolicy::Off => {
                let data = self.flights.dedupe(key, fetch, max_age).await?;
                (data, false, false)
            }
            DebouncePolicy::Fixed(debouncer) => {
                let outcome = debouncer.call(key, self.deduped(key, fetch.clone())).await?;
                let data = match outcome {
                    DebounceOutcome::Fired(data) => data,
                    // A collapsed caller still resolves: join (or start)
                    // the key's single flight, which the surviving call
                    // shares with us.
                    DebounceOutcome::Superseded | DebounceOutcome::Suppressed => {
                        self.flights.dedupe(key, fetch, max_age).await?
                    }
                };
                (data, true, false)
            }
            DebouncePolicy::Adaptive(adaptive) => {
                let outcome = adaptive.execute(key, self.deduped(key, fetch.clone())).await?;
                match outcome {
                    AdaptiveOutcome::Fired(data) => (data, true, false),
                    AdaptiveOutcome::Superseded => {
                        let data = self.flights.dedupe(key, fetch, max_age).await?;
                        (data, true, false)
                    }
                    // Over budget: the adaptive path already consulted
                    // and refreshed the cache
                    AdaptiveOutcome::Overloaded { value, from_cache } => {
                        return Ok(OptimizedResponse {
                            data: value,
                            cache_hit: from_cache,
                            debounced: false,
                            rate_limited: false,
                        });
                    }
                }
            }
        };

        if !already_cached {
            self.cache
                .write()
                .await
                .set(key.to_string(), data.clone(), options.ttl);
        }

        Ok(OptimizedResponse {
            data,
            cache_hit: false,
            debounced,
            rate_limited: false,
        })
    }

    /// Rate-exhausted path: cached data if live, else one unthrottled
    /// direct fetch whose result is cached.
    async fn serve_rate_limited<F, Fut>(
        &self,
        key: &str,
        fetch: F,
        options: &RequestOptions,
    ) -> FetchResult<OptimizedResponse<V>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = FetchResult<V>>,
    {
        if let Some(data) = self.cache_lookup(key).await {
            return Ok(OptimizedResponse {
                data,
                cache_hit: true,
                debounced: false,
                rate_limited: true,
            });
        }

        let data = fetch().await?;
        self.cache
            .write()
            .await
            .set(key.to_string(), data.clone(), options.ttl);

        Ok(OptimizedResponse {
            data,
            cache_hit: false,
            debounced: false,
            rate_limited: true,
        })
    }

    /// Cache read with explicit hit/miss instrumentation.
    async fn cache_lookup(&self, key: &str) -> Option<V> {
        let mut cache = self.cache.write().await;
        let value = cache.get(key);
        if value.is_some() {
            cache.record_hit();
        } else {
            cache.record_miss();
        }
        value
    }

    /// Wraps a fetch in the key's single flight, for handing to a
    /// debouncer.
    fn deduped<F, Fut>(
        &self,
        key: &str,
        fetch: F,
    ) -> impl FnOnce() -> futures::future::BoxFuture<'static, FetchResult<V>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        use futures::FutureExt;

        let flights = Arc::clone(&self.flights);
        let key = key.to_string();
        let max_age = self.config.dedupe.max_age;
        move || {
            async move { flights.dedupe(&key, fetch, max_age).await }.boxed()
        }
    }

    // == Invalidation ==
    /// Removes one cached key. Returns whether it was present.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.cache.write().await.delete(key)
    }

    /// Removes every cached key matching a single-`*` wildcard pattern.
    /// Returns the number removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let removed = self.cache.write().await.delete_pattern(pattern);
        debug!(pattern, removed, "pattern invalidation");
        removed
    }

    /// Entity-level invalidation cascade for the surrounding CRUD layer:
    /// drops the entity record (`entity:id`), its sub-resources
    /// (`entity:id:*`) and any list views (`entity:list*`).
    pub async fn invalidate_entity(&self, entity: &str, id: &str) -> usize {
        let mut cache = self.cache.write().await;
        let mut removed = usize::from(cache.delete(&format!("{entity}:{id}")));
        removed += cache.delete_pattern(&format!("{entity}:{id}:*"));
        removed += cache.delete_pattern(&format!("{entity}:list*"));
        debug!(entity, id, removed, "entity invalidation cascade");
        removed
    }

    // == Introspection ==
    /// Snapshot of the cache counters.
    pub async fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.read().await.stats()
    }

    /// Snapshot of the coalescing counters.
    pub fn flight_stats(&self) -> FlightStats {
        self.flights.stats()
    }

    /// Remaining rate budget for a key in the current window.
    pub async fn remaining_requests(&self, key: &str) -> usize {
        self.limiter.write().await.remaining_requests(key)
    }

    // == Lifecycle ==
    /// Starts the periodic sweep that prunes expired cache entries,
    /// stale pending calls and old rate windows. Replaces any previous
    /// sweep.
    pub async fn spawn_sweep(&self) {
        let (debouncer, adaptive) = match &self.policy {
            DebouncePolicy::Off => (None, None),
            DebouncePolicy::Fixed(debouncer) => (Some(Arc::clone(debouncer)), None),
            DebouncePolicy::Adaptive(adaptive) => (None, Some(Arc::clone(adaptive))),
        };

        let handle = spawn_sweep_task(
            Arc::clone(&self.cache),
            Arc::clone(&self.flights),
            Arc::clone(&self.limiter),
            debouncer,
            adaptive,
            self.config.sweep_interval,
            self.config.dedupe.max_age,
        );

        if let Some(previous) = self.sweep_handle.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Stops the sweep task. Pending fetches are unaffected; callers
    /// waiting on a flight still receive its outcome.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweep_handle.lock().await.take() {
            handle.abort();
            info!("sweep task stopped");
        }
    }
}
