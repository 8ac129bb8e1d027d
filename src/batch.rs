//! Batch Coalescer Module
//!
//! Groups individually requested keys that share a prefix into one
//! multi-key fetch per collection window. A group executes exactly once,
//! on timer expiry or on reaching the size cap, and every waiter
//! receives exactly one resolution or rejection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::config::BatchConfig;
use crate::error::{FetchError, FetchResult};

/// The multi-key upstream fetch a coalescer is built around.
type BatchFn<V> = Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, FetchResult<Vec<V>>> + Send + Sync>;

/// Maps a key to the group it batches under.
type GroupFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

// == Batch Entry ==
/// One waiter inside a pending group.
struct BatchEntry<V> {
    key: String,
    tx: oneshot::Sender<FetchResult<V>>,
}

// == Batch Group ==
/// A one-shot collection of waiters. Once executed it is removed; a new
/// call for the same logical group starts a fresh one.
struct BatchGroup<V> {
    /// Identity guard so a late timer never executes a successor group
    id: u64,
    entries: Vec<BatchEntry<V>>,
}

// == Batch Coalescer ==
/// Coalesces single-key requests into multi-key upstream calls.
pub struct BatchCoalescer<V: Clone + Send + 'static> {
    groups: Arc<Mutex<HashMap<String, BatchGroup<V>>>>,
    batch_fn: BatchFn<V>,
    group_fn: GroupFn,
    delay: Duration,
    max_batch_size: usize,
    next_id: AtomicU64,
}

impl<V: Clone + Send + 'static> BatchCoalescer<V> {
    // == Constructor ==
    /// Creates a coalescer with the default grouping function: the key
    /// prefix before the first `:` (the whole key when there is none).
    pub fn new<F, Fut>(config: &BatchConfig, batch_fn: F) -> Self
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<Vec<V>>> + Send + 'static,
    {
        Self::with_group_fn(config, batch_fn, |key: &str| {
            key.split(':').next().unwrap_or(key).to_string()
        })
    }

    /// Creates a coalescer with a custom grouping function.
    pub fn with_group_fn<F, Fut, G>(config: &BatchConfig, batch_fn: F, group_fn: G) -> Self
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<Vec<V>>> + Send + 'static,
        G: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            groups: Arc::new(Mutex::new(HashMap::new())),
            batch_fn: Arc::new(move |keys| batch_fn(keys).boxed()),
            group_fn: Arc::new(group_fn),
            delay: config.delay,
            max_batch_size: config.max_batch_size,
            next_id: AtomicU64::new(0),
        }
    }

    // == Request ==
    /// Requests the value for one key, batching it with other keys of
    /// the same group issued inside the collection window.
    ///
    /// The first call for a group arms its timer; reaching the size cap
    /// executes the group immediately, bypassing the timer. The group's
    /// distinct keys are fetched in first-enqueue order and each waiter
    /// resolves with the result at its key's index.
    pub async fn request(&self, key: &str) -> FetchResult<V> {
        let group_key = (self.group_fn)(key);
        let (tx, rx) = oneshot::channel();
        let entry = BatchEntry {
            key: key.to_string(),
            tx,
        };

        let full_group = {
            let mut groups = self.groups.lock().await;
            match groups.get_mut(&group_key) {
                Some(group) => {
                    group.entries.push(entry);
                    if group.entries.len() >= self.max_batch_size {
                        debug!(group = %group_key, "batch reached size cap");
                        groups.remove(&group_key)
                    } else {
                        None
                    }
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let group = BatchGroup {
                        id,
                        entries: vec![entry],
                    };
                    if self.max_batch_size == 1 {
                        Some(group)
                    } else {
                        groups.insert(group_key.clone(), group);
                        self.spawn_timer(group_key.clone(), id);
                        None
                    }
                }
            }
        };

        if let Some(group) = full_group {
            Self::execute(Arc::clone(&self.batch_fn), group).await;
        }

        rx.await
            .map_err(|_| FetchError::msg("batch dropped without resolving"))?
    }

    /// Arms the collection-window timer for a freshly created group.
    fn spawn_timer(&self, group_key: String, id: u64) {
        let groups = Arc::clone(&self.groups);
        let batch_fn = Arc::clone(&self.batch_fn);
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let group = {
                let mut groups = groups.lock().await;
                match groups.get(&group_key) {
                    Some(group) if group.id == id => groups.remove(&group_key),
                    // Already executed via the size cap, or replaced
                    _ => None,
                }
            };

            if let Some(group) = group {
                Self::execute(batch_fn, group).await;
            }
        });
    }

    /// Runs the multi-key fetch for one group and fans results back out.
    ///
    /// Duplicate keys share the result slot of their first occurrence.
    /// A result array shorter than the key list rejects the unmatched
    /// waiters; a fetch error rejects every waiter with the same error.
    async fn execute(batch_fn: BatchFn<V>, group: BatchGroup<V>) {
        let mut keys: Vec<String> = Vec::new();
        for entry in &group.entries {
            if !keys.contains(&entry.key) {
                keys.push(entry.key.clone());
            }
        }

        debug!(keys = keys.len(), waiters = group.entries.len(), "executing batch");

        match batch_fn(keys.clone()).await {
            Ok(values) => {
                for entry in group.entries {
                    let outcome = keys
                        .iter()
                        .position(|k| *k == entry.key)
                        .and_then(|idx| values.get(idx))
                        .cloned()
                        .ok_or_else(|| {
                            FetchError::msg(format!(
                                "batch fetch returned no result for key '{}'",
                                entry.key
                            ))
                        });
                    // A waiter that stopped listening is not an error
                    let _ = entry.tx.send(outcome);
                }
            }
            Err(err) => {
                for entry in group.entries {
                    let _ = entry.tx.send(Err(err.clone()));
                }
            }
        }
    }

    // == Pending Groups ==
    /// Returns the number of groups currently collecting.
    pub async fn pending_groups(&self) -> usize {
        self.groups.lock().await.len()
    }
}
