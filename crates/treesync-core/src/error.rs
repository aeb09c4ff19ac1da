//! Core error types for treesync.

use thiserror::Error;
use treesync_engine::SyncError;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Sync engine error
    #[error("Engine error: {0}")]
    Engine(#[from] SyncError),

    /// A diff sink rejected a flush
    #[error("Sink error: {0}")]
    Sink(String),
}

impl From<serde_yaml::Error> for CoreError {
    fn from(e: serde_yaml::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}
