//! CLI-specific functionality for bulwark
//!
//! This module contains all CLI-related code including argument parsing,
//! payload loading, configuration discovery and the simulated workload.

pub mod args;
pub mod config;
pub mod tasks;
pub mod workload;

pub use args::{Args, ExecutionMode, RunConfig};
pub use config::ConfigDiscovery;
pub use tasks::{FileError, TaskInput, TaskLoader};
pub use workload::{SimulatedHandler, WorkloadReport, run_workload};
