//! Single-Flight Coalescer Module
//!
//! Deduplicates concurrent fetches for the same key. When several
//! callers miss the cache for one logical resource at the same time,
//! only one upstream call is made and its outcome, success or failure,
//! is shared by every waiter. This is the thundering-herd guard,
//! independent of any debouncing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::DedupeConfig;
use crate::error::{FetchError, FetchResult};

// == Pending Call ==
/// One in-flight fetch, shared among all callers for its key.
struct PendingCall<V: Clone> {
    /// The shared upstream future every joiner awaits
    future: Shared<BoxFuture<'static, FetchResult<V>>>,
    /// When the fetch was started; bounds how long joiners may reuse it
    started_at: Instant,
    /// Identity guard so delayed removal never drops a replacement
    id: u64,
}

// == Flight Stats ==
/// Coalescing counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlightStats {
    /// Total dedupe calls received
    pub total_requests: u64,
    /// Calls that joined an existing pending fetch
    pub coalesced: u64,
    /// Calls that started a new upstream fetch
    pub new_fetches: u64,
}

impl FlightStats {
    /// Fraction of calls that were absorbed by an existing fetch.
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced as f64 / self.total_requests as f64
        }
    }
}

// == Single Flight ==
/// Per-key registry ensuring at most one live upstream fetch per key.
pub struct SingleFlight<V: Clone + Send + Sync + 'static> {
    /// In-flight calls by key
    flights: Arc<Mutex<HashMap<String, PendingCall<V>>>>,
    /// Lingering period after success, absorbing near-simultaneous callers
    grace: Duration,
    /// Monotonic id source for pending calls
    next_id: AtomicU64,
    total_requests: AtomicU64,
    coalesced: AtomicU64,
    new_fetches: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> SingleFlight<V> {
    // == Constructor ==
    /// Creates a new coalescer from a validated configuration.
    pub fn new(config: &DedupeConfig) -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            grace: config.grace,
            next_id: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            new_fetches: AtomicU64::new(0),
        }
    }

    // == Dedupe ==
    /// Returns the value for `key`, joining an existing pending call if
    /// one younger than `max_age` exists, otherwise invoking `fetch`.
    ///
    /// Every caller attached to the same pending call receives the
    /// identical resolution or the identical (cloned) rejection; there
    /// is no partial-success fan-out. A failed call is removed from the
    /// registry immediately so the next caller retries; a successful
    /// call lingers for the configured grace period.
    pub async fn dedupe<F, Fut>(&self, key: &str, fetch: F, max_age: Duration) -> FetchResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        // Join an existing young-enough flight, or register a new one,
        // under a single lock acquisition so no interleaving caller can
        // start a duplicate fetch in between.
        let (shared, created_id) = {
            let mut flights = self.flights.lock().await;
            match flights.get(key) {
                Some(pending) if pending.started_at.elapsed() < max_age => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "joined in-flight fetch");
                    (pending.future.clone(), None)
                }
                _ => {
                    self.new_fetches.fetch_add(1, Ordering::Relaxed);
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let shared = fetch().boxed().shared();
                    flights.insert(
                        key.to_string(),
                        PendingCall {
                            future: shared.clone(),
                            started_at: Instant::now(),
                            id,
                        },
                    );
                    (shared, Some(id))
                }
            }
        };

        let result = shared.await;

        // Only the caller that registered the flight manages its removal.
        if let Some(id) = created_id {
            match &result {
                Ok(_) => self.schedule_removal(key.to_string(), id),
                Err(_) => {
                    let mut flights = self.flights.lock().await;
                    if flights.get(key).map(|p| p.id) == Some(id) {
                        flights.remove(key);
                    }
                }
            }
        }

        result
    }

    /// Removes the pending call after the grace period, unless it has
    /// already been replaced.
    fn schedule_removal(&self, key: String, id: u64) {
        let flights = Arc::clone(&self.flights);
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut flights = flights.lock().await;
            if flights.get(&key).map(|p| p.id) == Some(id) {
                flights.remove(&key);
            }
        });
    }

    // == Prune Stale ==
    /// Removes pending calls older than `older_than`. Used by the
    /// periodic sweep to bound memory independent of traffic.
    pub async fn prune_stale(&self, older_than: Duration) -> usize {
        let mut flights = self.flights.lock().await;
        let before = flights.len();
        flights.retain(|_, pending| pending.started_at.elapsed() < older_than);
        before - flights.len()
    }

    // == In Flight ==
    /// Returns the number of currently registered pending calls.
    pub async fn in_flight(&self) -> usize {
        self.flights.lock().await.len()
    }

    // == Stats ==
    /// Returns the accumulated coalescing counters.
    pub fn stats(&self) -> FlightStats {
        FlightStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            new_fetches: self.new_fetches.load(Ordering::Relaxed),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::time::sleep;

    fn flight() -> SingleFlight<u32> {
        SingleFlight::new(&DedupeConfig {
            max_age: Duration::from_secs(30),
            grace: Duration::from_millis(50),
        })
    }

    const MAX_AGE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_single_call_fetches_once() {
        let flights = flight();
        let counter = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&counter);
        let result = flights
            .dedupe(
                "test",
                move || async move {
                    c.fetch_add(1, Ordering::Relaxed);
                    Ok(42)
                },
                MAX_AGE,
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let flights = Arc::new(flight());
        let fetch_count = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let flights = Arc::clone(&flights);
            let fetch_count = Arc::clone(&fetch_count);

            handles.push(tokio::spawn(async move {
                flights
                    .dedupe(
                        "shared",
                        move || {
                            let fc = Arc::clone(&fetch_count);
                            async move {
                                fc.fetch_add(1, Ordering::Relaxed);
                                sleep(Duration::from_millis(100)).await;
                                Ok(7)
                            }
                        },
                        MAX_AGE,
                    )
                    .await
            }));
        }

        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert!(results.iter().all(|r| *r.as_ref().unwrap() == 7));
        assert_eq!(fetch_count.load(Ordering::Relaxed), 1);

        let stats = flights.stats();
        assert_eq!(stats.total_requests, 10);
        assert_eq!(stats.new_fetches, 1);
        assert_eq!(stats.coalesced, 9);
        assert!(stats.coalescing_ratio() > 0.8);
    }

    #[tokio::test]
    async fn test_different_keys_not_coalesced() {
        let flights = flight();
        let counter = Arc::new(AtomicU32::new(0));

        for i in 0..3 {
            let c = Arc::clone(&counter);
            let result = flights
                .dedupe(
                    &format!("key-{}", i),
                    move || async move {
                        c.fetch_add(1, Ordering::Relaxed);
                        Ok(i)
                    },
                    MAX_AGE,
                )
                .await;
            assert_eq!(result.unwrap(), i);
        }

        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_error_shared_and_removed_immediately() {
        let flights = Arc::new(flight());
        let fetch_count = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let flights = Arc::clone(&flights);
            let fetch_count = Arc::clone(&fetch_count);

            handles.push(tokio::spawn(async move {
                flights
                    .dedupe(
                        "failing",
                        move || {
                            let fc = Arc::clone(&fetch_count);
                            async move {
                                fc.fetch_add(1, Ordering::Relaxed);
                                sleep(Duration::from_millis(50)).await;
                                Err::<u32, _>(FetchError::msg("backend down"))
                            }
                        },
                        MAX_AGE,
                    )
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.unwrap_err().to_string(), "backend down");
        }
        assert_eq!(fetch_count.load(Ordering::Relaxed), 1);

        // The failed flight is gone at once, so the next call retries
        sleep(Duration::from_millis(10)).await;
        assert_eq!(flights.in_flight().await, 0);

        let result = flights
            .dedupe("failing", move || async move { Ok(9) }, MAX_AGE)
            .await;
        assert_eq!(result.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_grace_period_absorbs_followup_caller() {
        let flights = flight();
        let fetch_count = Arc::new(AtomicU32::new(0));

        let fc = Arc::clone(&fetch_count);
        let first = flights
            .dedupe(
                "grace",
                move || async move {
                    fc.fetch_add(1, Ordering::Relaxed);
                    Ok(1)
                },
                MAX_AGE,
            )
            .await;
        assert_eq!(first.unwrap(), 1);

        // Within the 50ms grace window the settled call is still joinable
        let fc = Arc::clone(&fetch_count);
        let second = flights
            .dedupe(
                "grace",
                move || async move {
                    fc.fetch_add(1, Ordering::Relaxed);
                    Ok(2)
                },
                MAX_AGE,
            )
            .await;
        assert_eq!(second.unwrap(), 1, "grace-window caller reuses the settled value");
        assert_eq!(fetch_count.load(Ordering::Relaxed), 1);

        // After the grace period the registry entry is removed
        sleep(Duration::from_millis(100)).await;
        assert_eq!(flights.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_max_age_bounds_reuse() {
        let flights = flight();
        let fetch_count = Arc::new(AtomicU32::new(0));

        let fc = Arc::clone(&fetch_count);
        let first = flights
            .dedupe(
                "aged",
                move || async move {
                    fc.fetch_add(1, Ordering::Relaxed);
                    Ok(1)
                },
                Duration::from_millis(20),
            )
            .await;
        assert_eq!(first.unwrap(), 1);

        sleep(Duration::from_millis(30)).await;

        // The settled call still lingers (grace 50ms) but is now older
        // than the caller's max_age, so a fresh fetch is started.
        let fc = Arc::clone(&fetch_count);
        let second = flights
            .dedupe(
                "aged",
                move || async move {
                    fc.fetch_add(1, Ordering::Relaxed);
                    Ok(2)
                },
                Duration::from_millis(20),
            )
            .await;
        assert_eq!(second.unwrap(), 2);
        assert_eq!(fetch_count.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_prune_stale() {
        let flights = Arc::new(flight());

        // Park a slow flight in the registry
        let f2 = Arc::clone(&flights);
        let handle = tokio::spawn(async move {
            f2.dedupe(
                "slow",
                move || async move {
                    sleep(Duration::from_millis(200)).await;
                    Ok(1)
                },
                MAX_AGE,
            )
            .await
        });

        sleep(Duration::from_millis(50)).await;
        assert_eq!(flights.in_flight().await, 1);

        let pruned = flights.prune_stale(Duration::from_millis(10)).await;
        assert_eq!(pruned, 1);
        assert_eq!(flights.in_flight().await, 0);

        // The already-started fetch still completes for its waiters
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }
}
