//! # Bulwark
//!
//! An in-process reliability layer for long-running asynchronous work:
//! a bounded task queue with retries and dead-lettering, health scoring,
//! pre/post hooks, resource leak tracking, session snapshots and an
//! escalating recovery controller.
//!
//! ## Architecture Overview
//!
//! - **[`task`]**: Bounded queue with batch processing, per-task timeouts,
//!   exponential backoff and a dead-letter list
//! - **[`health`]**: Rolling health score and queue health assessment
//! - **[`hooks`]**: Ordered, timeout-bounded pre/post hooks per operation
//! - **[`resources`]**: Registry of timers, operations and disposables with
//!   leak detection and bulk cleanup
//! - **[`session`]**: Versioned session snapshots over a key-value store
//! - **[`recovery`]**: Error classification and single-flight escalation
//!   from cleanup through restart and reset to graceful shutdown
//! - **[`integration`]**: The [`Engine`] that wires everything together
//!
//! ## Features
//!
//! ### 🔁 Task Processing
//! - **Admission control**: enqueue fails fast once the queue is full
//! - **Retries**: exponential backoff with a ceiling, then dead-lettering
//! - **Isolation**: a panicking or hanging handler only fails its own task
//!
//! ### 🩺 Self-Healing
//! - **Degradation signals**: memory, leaked resources, accumulated errors,
//!   dead-letter backlog and an unresponsive host
//! - **Escalation**: each strategy is retried with doubling backoff before
//!   the next one is tried
//! - **Manual restart**: once everything fails the engine says so and stops
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bulwark::{Engine, EngineConfig, NoopHost, TaskHandler};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Upload;
//!
//! #[async_trait]
//! impl TaskHandler for Upload {
//!     async fn execute(&self, payload: serde_json::Value) -> anyhow::Result<serde_json::Value> {
//!         Ok(serde_json::json!({ "uploaded": payload }))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::new(EngineConfig::default(), Arc::new(Upload), Arc::new(NoopHost)).await?;
//!     engine.start_monitoring();
//!
//!     let task_id = engine.enqueue(serde_json::json!({ "file": "report.pdf" })).await?;
//!     println!("Enqueued {}", task_id);
//!
//!     engine.shutdown().await
//! }
//! ```

/// Environment constants and path utilities.
///
/// Centralizes hardcoded names, hook operation keys and directory layout.
pub mod env;

/// Tracked timers, in-flight operations and disposables.
pub mod resources;

/// Pre/post hook pipeline.
pub mod hooks;

/// Health scoring and assessment.
pub mod health;

/// Bounded task queue with retries, backoff and dead-lettering.
pub mod task;

/// Session snapshots over pluggable key-value stores.
pub mod session;

/// Error classification and escalating recovery.
pub mod recovery;

/// Engine composition and configuration.
pub mod integration;

// CLI module for command-line interface
pub mod cli;

pub use health::{HealthConfig, HealthMonitor};
pub use hooks::{Hook, HookContext, HookKind, HookOutcome, HookPipeline};
pub use integration::{Engine, EngineConfig, EngineStatus, HookConfig};
pub use recovery::{NoopHost, RecoveryConfig, RecoveryController, RecoveryHost, StrategyKind};
pub use resources::ResourceTracker;
pub use session::{FileStore, KeyValueStore, MemoryStore, SessionPersistence, SessionState};
pub use task::{QueueConfig, QueueError, Task, TaskHandler, TaskId, TaskQueue, TaskStatus};
