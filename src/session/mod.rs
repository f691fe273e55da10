//! # Session Persistence
//!
//! Best-effort snapshot and restore of opaque session state to a durable
//! key-value store. The recovery controller saves state before restarting a
//! session and restores it afterwards.

pub mod persistence;
pub mod store;


pub use persistence::*;
pub use store::*;
