//! # Resource Tracking
//!
//! Keeps a registry of everything the engine schedules or holds open:
//!
//! - **Timers**: one-shot delayed work such as task retries
//! - **Repeating timers**: periodic work such as the recovery sampler
//! - **Operations**: in-flight futures (task handlers, hook actions) that
//!   untrack themselves when they settle
//! - **Disposables**: cleanup callbacks run on cancellation
//!
//! Leak detection is count based; [`ResourceTracker::cleanup_leaked_resources`]
//! releases everything at once and is shared by routine maintenance and
//! forced restarts.

pub mod memory;
pub mod tracker;

#[cfg(test)]
mod tests;

pub use memory::*;
pub use tracker::*;
