//! Error types for the activity log and webhook delivery

use archdesk_lock::LockError;
use std::path::PathBuf;
use thiserror::Error;

/// Activity log errors
#[derive(Error, Debug)]
pub enum ActivityError {
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The writer task has stopped and no longer accepts commands
    #[error("Activity writer is not running")]
    WriterClosed,
}

/// Result type for activity log operations
pub type ActivityResult<T> = Result<T, ActivityError>;

/// Webhook delivery errors
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("Webhook endpoint returned status {0}")]
    Status(u16),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(String),
}
