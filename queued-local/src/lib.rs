//! queued-local library crate.
//!
//! A local job manager: command lines are recorded durably, queued, run by a
//! fixed pool of workers, and replayed after a restart if they never started.

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod queue;

pub use error::{Error, Result};
