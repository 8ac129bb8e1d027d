//! Adaptive Debouncer Module
//!
//! Trailing debouncer whose delay scales with the observed call
//! frequency for a key. Under sustained overload it stops debouncing
//! altogether and serves from the shared cache, trading freshness for
//! stability.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::cache::TtlCache;
use crate::config::AdaptiveConfig;
use crate::error::FetchResult;

/// Delay contributed by each observed request per second.
const DELAY_PER_RPS: Duration = Duration::from_millis(50);

// == Frequency Window ==
/// Per-key call counter over a rolling tracking window.
#[derive(Debug)]
struct FrequencyWindow {
    /// Calls observed since the window started
    count: u32,
    /// When the current window opened
    window_start: Instant,
}

// == Adaptive Outcome ==
/// What happened to one adaptively debounced call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdaptiveOutcome<V> {
    /// The call survived its computed quiet period and fetched
    Fired(V),
    /// A later call replaced this one before its timer elapsed
    Superseded,
    /// The key is over budget; the value came from the cache path
    Overloaded {
        /// The value served
        value: V,
        /// Whether it was already cached (false = one direct fetch ran)
        from_cache: bool,
    },
}

// == Adaptive Debouncer ==
/// Frequency-adaptive debouncer backed by the shared TTL cache.
///
/// The effective delay is `clamp(requests_per_second * 50ms, min_delay,
/// max_delay)`. Once a key exceeds `max_requests` calls inside the
/// tracking window, timer logic is bypassed entirely: the cached value
/// is served if present, otherwise a single fetch runs and its result
/// is written back to the cache.
pub struct AdaptiveDebouncer<V> {
    windows: Mutex<HashMap<String, FrequencyWindow>>,
    /// Trailing-edge generations, as in the fixed debouncer
    generations: Mutex<HashMap<String, u64>>,
    cache: Arc<RwLock<TtlCache<V>>>,
    config: AdaptiveConfig,
}

impl<V: Clone + Send + Sync + 'static> AdaptiveDebouncer<V> {
    // == Constructor ==
    /// Creates a new adaptive debouncer over a shared cache.
    pub fn new(config: &AdaptiveConfig, cache: Arc<RwLock<TtlCache<V>>>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            generations: Mutex::new(HashMap::new()),
            cache,
            config: config.clone(),
        }
    }

    // == Execute ==
    /// Submits a call for `key`, debouncing it with a frequency-scaled
    /// delay, or serving it from the cache when the key is over budget.
    pub async fn execute<F, Fut>(&self, key: &str, fetch: F) -> FetchResult<AdaptiveOutcome<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<V>>,
    {
        let (count, elapsed) = self.observe(key).await;

        if count > self.config.max_requests {
            debug!(key, count, "over budget, serving through cache");
            return self.serve_capped(key, fetch).await;
        }

        let delay = self.effective_delay(count, elapsed);

        let my_generation = {
            let mut generations = self.generations.lock().await;
            let generation = generations.entry(key.to_string()).or_insert(0);
            *generation += 1;
            *generation
        };

        tokio::time::sleep(delay).await;

        let survived = {
            let mut generations = self.generations.lock().await;
            match generations.get(key) {
                Some(generation) if *generation == my_generation => {
                    generations.remove(key);
                    true
                }
                _ => false,
            }
        };

        if !survived {
            return Ok(AdaptiveOutcome::Superseded);
        }

        let value = fetch().await?;
        Ok(AdaptiveOutcome::Fired(value))
    }

    /// Overload path: cached value if live, else one direct fetch whose
    /// result is written back so subsequent capped callers hit the cache.
    async fn serve_capped<F, Fut>(&self, key: &str, fetch: F) -> FetchResult<AdaptiveOutcome<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<V>>,
    {
        let cached = {
            let mut cache = self.cache.write().await;
            let value = cache.get(key);
            if value.is_some() {
                cache.record_hit();
            } else {
                cache.record_miss();
            }
            value
        };

        if let Some(value) = cached {
            return Ok(AdaptiveOutcome::Overloaded {
                value,
                from_cache: true,
            });
        }

        let value = fetch().await?;
        self.cache
            .write()
            .await
            .set(key.to_string(), value.clone(), None);
        Ok(AdaptiveOutcome::Overloaded {
            value,
            from_cache: false,
        })
    }

    /// Records one call for the key and returns the in-window count and
    /// window age. The window resets once it has fully elapsed.
    async fn observe(&self, key: &str) -> (u32, Duration) {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(key.to_string()).or_insert(FrequencyWindow {
            count: 0,
            window_start: Instant::now(),
        });

        if window.window_start.elapsed() >= self.config.window {
            window.count = 0;
            window.window_start = Instant::now();
        }

        window.count += 1;
        (window.count, window.window_start.elapsed())
    }

    /// Computes `clamp(rps * 50ms, min_delay, max_delay)`. A window
    /// younger than one second reads as a full second so a lone early
    /// call is not mistaken for a burst.
    fn effective_delay(&self, count: u32, elapsed: Duration) -> Duration {
        let elapsed_secs = elapsed.as_secs_f64().max(1.0);
        let rps = count as f64 / elapsed_secs;
        let raw = DELAY_PER_RPS.mul_f64(rps);
        raw.clamp(self.config.min_delay, self.config.max_delay)
    }

    // == Prune Windows ==
    /// Drops frequency windows that have fully elapsed, bounding memory
    /// independent of traffic. Returns the number removed.
    pub async fn prune_windows(&self) -> usize {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, w| w.window_start.elapsed() < self.config.window);
        before - windows.len()
    }

    /// Returns the number of keys with an open frequency window.
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}
