//! Engine error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can escape the synchronization engine.
///
/// Filesystem races (a path vanishing between an event and its probe) are
/// not errors; they surface as absent entries and abandoned events.
#[derive(Debug, Error)]
pub enum SyncError {
    /// I/O error outside of per-entry probing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Root path not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// File watcher error
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// The mapping or queue was already disposed
    #[error("Engine already disposed")]
    Disposed,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<notify::Error> for SyncError {
    fn from(e: notify::Error) -> Self {
        SyncError::Watcher(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::NotFound(PathBuf::from("/test/path"));
        assert!(err.to_string().contains("/test/path"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SyncError = io_err.into();
        assert!(matches!(err, SyncError::Io(_)));
    }

    #[test]
    fn test_disposed_display() {
        assert_eq!(SyncError::Disposed.to_string(), "Engine already disposed");
    }
}
