//! # Recovery
//!
//! Detection of systemic degradation and escalating remediation.
//!
//! - [`ErrorJournal`] accumulates errors reported by the queue, hooks and
//!   probes.
//! - [`ErrorClassifier`] buckets them by keyword (memory, network, state)
//!   and selects a [`StrategyKind`].
//! - [`RecoveryController`] samples memory, tracked resources, accumulated
//!   errors and host responsiveness on a fixed interval and runs the selected
//!   strategy, escalating cleanup -> restart -> reset -> graceful shutdown.
//! - [`RecoveryHost`] is the seam to the environment being kept alive.

pub mod classifier;
pub mod controller;
pub mod host;
pub mod journal;
pub mod types;


pub use classifier::*;
pub use controller::*;
pub use host::*;
pub use journal::*;
pub use types::*;
