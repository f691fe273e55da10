//! # Hook Pipeline
//!
//! Ordered pre/post hooks wrapped around named operations such as task
//! execution and session persistence.
//!
//! - Hooks of one operation are kept sorted by ascending priority and run
//!   strictly one after another.
//! - Each hook races its own timeout; panics are captured as failures.
//! - A failing *blocking* hook halts the chain, a non-blocking failure is
//!   recorded and the chain continues.
//! - Pre hooks may replace the context content seen by later hooks and by
//!   the wrapped work.

pub mod pipeline;
pub mod types;


pub use pipeline::*;
pub use types::*;
