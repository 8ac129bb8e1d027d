//! Fixed-Delay Debouncer Module
//!
//! Per-key trailing or immediate debouncing. Each call for a key
//! logically cancels and replaces the key's previous timer; only the
//! timer that survives a full quiet period fires. Once a closure has
//! started running it is never cancelled, later calls only affect
//! future scheduling.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{DebounceConfig, DebounceMode};
use crate::error::FetchResult;

// == Debounce State ==
/// Per-key scheduling state: Idle -> Scheduled -> (Cancelled ->
/// Scheduled)* -> Fired -> Idle.
#[derive(Debug, Default)]
struct DebounceState {
    /// Bumped on every trailing call; only the latest generation fires
    generation: u64,
    /// End of the current immediate-mode quiet window
    window_deadline: Option<Instant>,
}

// == Debounce Outcome ==
/// What happened to one debounced call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebounceOutcome<V> {
    /// This call survived the quiet period and its closure ran
    Fired(V),
    /// A later call replaced this one before its timer elapsed
    Superseded,
    /// Immediate mode: the quiet window is already occupied
    Suppressed,
}

// == Debouncer ==
/// Fixed-delay debouncer keyed by string.
pub struct Debouncer {
    states: Arc<Mutex<HashMap<String, DebounceState>>>,
    delay: Duration,
    mode: DebounceMode,
}

impl Debouncer {
    // == Constructor ==
    /// Creates a new debouncer from a validated configuration.
    pub fn new(config: &DebounceConfig) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            delay: config.delay,
            mode: config.mode,
        }
    }

    // == Call ==
    /// Submits a call for `key`.
    ///
    /// Trailing mode: the call sleeps for the configured delay and fires
    /// only if no newer call arrived for the key in the meantime. The
    /// surviving call runs its own closure, which is by construction the
    /// most recently submitted one.
    ///
    /// Immediate mode: the first call of a quiet window fires without
    /// delay; calls landing inside the window are suppressed and do not
    /// extend it.
    pub async fn call<F, Fut, V>(&self, key: &str, f: F) -> FetchResult<DebounceOutcome<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<V>>,
    {
        match self.mode {
            DebounceMode::Trailing => self.call_trailing(key, f).await,
            DebounceMode::Immediate => self.call_immediate(key, f).await,
        }
    }

    async fn call_trailing<F, Fut, V>(&self, key: &str, f: F) -> FetchResult<DebounceOutcome<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<V>>,
    {
        let my_generation = {
            let mut states = self.states.lock().await;
            let state = states.entry(key.to_string()).or_default();
            state.generation += 1;
            state.generation
        };

        tokio::time::sleep(self.delay).await;

        let survived = {
            let mut states = self.states.lock().await;
            match states.get(key) {
                Some(state) if state.generation == my_generation => {
                    // Back to Idle; a fresh burst starts a fresh state
                    states.remove(key);
                    true
                }
                _ => false,
            }
        };

        if !survived {
            debug!(key, "debounced call superseded");
            return Ok(DebounceOutcome::Superseded);
        }

        let value = f().await?;
        Ok(DebounceOutcome::Fired(value))
    }

    async fn call_immediate<F, Fut, V>(&self, key: &str, f: F) -> FetchResult<DebounceOutcome<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<V>>,
    {
        let leading = {
            let mut states = self.states.lock().await;
            let state = states.entry(key.to_string()).or_default();
            let now = Instant::now();
            match state.window_deadline {
                Some(deadline) if now < deadline => false,
                _ => {
                    state.window_deadline = Some(now + self.delay);
                    true
                }
            }
        };

        if !leading {
            debug!(key, "call suppressed inside quiet window");
            return Ok(DebounceOutcome::Suppressed);
        }

        let value = f().await?;
        Ok(DebounceOutcome::Fired(value))
    }

    // == Prune Idle ==
    /// Drops immediate-mode states whose quiet window has elapsed.
    /// Trailing states are removed when their timer fires and are left
    /// alone here. Returns the number of states removed.
    pub async fn prune_idle(&self) -> usize {
        let mut states = self.states.lock().await;
        let before = states.len();
        let now = Instant::now();
        states.retain(|_, state| match state.window_deadline {
            Some(deadline) => now < deadline,
            None => true,
        });
        before - states.len()
    }

    /// Returns the number of keys currently tracked.
    pub async fn tracked_keys(&self) -> usize {
        self.states.lock().await.len()
    }
}
