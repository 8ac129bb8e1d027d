//! Background Tasks Module
//!
//! Periodic maintenance for the optimization layer's registries.

mod sweep;

pub use sweep::spawn_sweep_task;
