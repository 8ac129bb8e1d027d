//! Error types for the request optimization layer
//!
//! Provides unified error handling using thiserror. Upstream fetch errors
//! are carried opaquely and propagated verbatim to every waiter; they are
//! never reclassified or retried by this crate.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

// == Config Error Enum ==
/// Construction-time configuration errors.
///
/// Invalid limits and durations are programming errors and fail fast when
/// a component is built, never at call time.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A capacity bound was zero or otherwise unusable
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    /// A duration was zero where a positive duration is required
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// A request budget or batch size was zero or inconsistent
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),
}

// == Fetch Error ==
/// Opaque, clonable wrapper around an upstream fetch failure.
///
/// A single in-flight fetch fans its outcome out to every coalesced
/// waiter through a shared future, so the error must be `Clone`. The
/// original error is held behind an `Arc` and rendered verbatim.
#[derive(Debug, Clone)]
pub struct FetchError(Arc<anyhow::Error>);

impl FetchError {
    /// Wraps any error type accepted by `anyhow`.
    pub fn new<E: Into<anyhow::Error>>(err: E) -> Self {
        Self(Arc::new(err.into()))
    }

    /// Creates an error from a plain message.
    pub fn msg<M>(msg: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::anyhow!(msg)))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for FetchError {}

// == Result Type Alias ==
/// Convenience Result type for fetch paths.
pub type FetchResult<T> = std::result::Result<T, FetchError>;
