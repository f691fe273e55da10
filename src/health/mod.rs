//! # Health Monitoring
//!
//! Rolling health score over recent task outcomes plus the threshold checks
//! that decide whether the queue should ask for remediation.

pub mod monitor;


pub use monitor::*;
