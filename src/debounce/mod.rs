//! Debounce Module
//!
//! Collapses bursts of calls for the same key into a single invocation.
//! Two variants share the cancel-and-reschedule core: a fixed-delay
//! debouncer and a frequency-adaptive one that degrades to cache-serving
//! under sustained overload.

mod adaptive;
mod fixed;

// Re-export public types
pub use adaptive::{AdaptiveDebouncer, AdaptiveOutcome};
pub use fixed::{DebounceOutcome, Debouncer};
