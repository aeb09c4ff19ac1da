//! Treesync Core Components
//!
//! This crate wires the sync engine into a running session, including
//! configuration, the periodic flush loop, and session statistics.

mod config;
mod error;
mod metrics;
mod session;

pub use config::SyncConfig;
pub use error::CoreError;
pub use metrics::{SessionStats, StatsSnapshot};
pub use session::{DiffSink, SyncSession};
