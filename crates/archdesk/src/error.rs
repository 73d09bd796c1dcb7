//! Errors returned by archdesk workflows

use archdesk_activity::ActivityError;
use archdesk_archive::ArchiveError;
use archdesk_resilience::RetryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Empty, or contains `..`, `/` or `\`
    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Invalid filenames detected: {}", .0.join(", "))]
    InvalidFilenames(Vec<String>),

    #[error("No filenames provided")]
    NoFilenames,

    #[error("Only ZIP files are allowed: {0}")]
    NotZip(String),

    #[error("File size {size} exceeds the {max} byte limit")]
    TooLarge { size: u64, max: u64 },

    #[error("Upload not found: {0}")]
    NotFound(String),

    #[error("File operation failed: {0}")]
    FileOperation(#[from] RetryError<std::io::Error>),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Activity log error: {0}")]
    Activity(#[from] ActivityError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
