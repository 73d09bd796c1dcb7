//! Error types for lock operations

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    /// The lock stayed held by someone else for the whole timeout
    #[error("could not acquire lock for {} within {timeout:?}", path.display())]
    Timeout {
        /// Path the lock protects
        path: PathBuf,
        /// How long acquisition was attempted
        timeout: Duration,
    },

    /// Creating, reading or removing the marker file failed
    #[error("lock marker {}: {source}", path.display())]
    Io {
        /// Marker file path
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The marker contents could not be encoded
    #[error("failed to encode lock marker: {0}")]
    Marker(#[from] serde_json::Error),
}

/// Result type for lock operations
pub type LockResult<T> = Result<T, LockError>;
