//! Cancellable background tasks for splatreg
//!
//! Long-running operations (mixture builds, partitioned merges) run through a
//! [`TaskRunner`]: one worker thread per task, at most one task per slot,
//! cooperative cancellation and coalesced progress delivered to coordinator-side
//! sinks.

pub mod config;
pub mod context;
pub mod runner;

pub use config::*;
pub use context::*;
pub use runner::*;

pub use splatreg_core::{Error, Result};
