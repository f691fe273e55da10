//! # Task Queue
//!
//! Admission, batching and retry of caller-supplied work.
//!
//! ## Lifecycle
//!
//! ```text
//! pending -> processing -> completed            (retained until compaction)
//!                       -> pending              (retry after backoff)
//!                       -> failed/dead-letter   (retained until cleared or retried)
//! ```
//!
//! Each batch runs its tasks concurrently with isolated outcomes; a task's
//! handler races a per-task timeout and is wrapped by the `task.before` and
//! `task.after` hooks. After every batch the queue consults the
//! [`HealthMonitor`](crate::health::HealthMonitor) and, when unhealthy,
//! asks its [`RecoveryTrigger`] to remediate before continuing.

pub mod backoff;
pub mod queue;
pub mod types;


pub use backoff::*;
pub use queue::*;
pub use types::*;
