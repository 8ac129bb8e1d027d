//! Periodic Sweep Task
//!
//! Background task that bounds memory independent of traffic patterns:
//! expired cache entries, stale pending calls, elapsed debounce windows
//! and out-of-window rate timestamps are all pruned on an interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::debounce::{AdaptiveDebouncer, Debouncer};
use crate::flight::SingleFlight;
use crate::ratelimit::SlidingWindowLimiter;

/// Spawns a background task that periodically prunes every registry of
/// the optimization layer.
///
/// The task runs in an infinite loop, sleeping for `interval` between
/// sweeps. Pending calls older than `flight_max_age` are dropped from
/// the single-flight registry; waiters already attached to them still
/// receive their outcome.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the
/// task during shutdown.
pub fn spawn_sweep_task<V: Clone + Send + Sync + 'static>(
    cache: Arc<RwLock<TtlCache<V>>>,
    flights: Arc<SingleFlight<V>>,
    limiter: Arc<RwLock<SlidingWindowLimiter>>,
    debouncer: Option<Arc<Debouncer>>,
    adaptive: Option<Arc<AdaptiveDebouncer<V>>>,
    interval: Duration,
    flight_max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "starting sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let expired = {
                let mut cache = cache.write().await;
                cache.cleanup_expired()
            };

            let stale_flights = flights.prune_stale(flight_max_age).await;

            let pruned_timestamps = {
                let mut limiter = limiter.write().await;
                limiter.prune()
            };

            let mut idle_windows = 0;
            if let Some(debouncer) = &debouncer {
                idle_windows += debouncer.prune_idle().await;
            }
            if let Some(adaptive) = &adaptive {
                idle_windows += adaptive.prune_windows().await;
            }

            if expired + stale_flights + pruned_timestamps + idle_windows > 0 {
                info!(
                    expired,
                    stale_flights, pruned_timestamps, idle_windows, "sweep removed entries"
                );
            } else {
                debug!("sweep found nothing to remove");
            }
        }
    })
}
