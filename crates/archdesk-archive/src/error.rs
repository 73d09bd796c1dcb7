//! Error types for archive operations

use thiserror::Error;

/// Errors that can occur while reading, scanning or searching archives
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// IO error during archive operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid ZIP archive format
    #[error("Invalid ZIP archive: {0}")]
    InvalidZip(#[from] zip::result::ZipError),

    /// Entry is encrypted and no password handling is available
    #[error("Archive is password-protected")]
    PasswordProtected,

    /// Entry index does not exist in the entry table
    #[error("No entry at index {0}")]
    NoSuchEntry(usize),

    /// File within archive exceeds size limit
    #[error("File '{name}' is too large ({size} bytes, max {max} bytes)")]
    FileTooLarge {
        /// Name of the file that exceeded the limit
        name: String,
        /// Actual file size in bytes
        size: u64,
        /// Maximum allowed file size in bytes
        max: u64,
    },

    /// Search term was empty
    #[error("Search query is required")]
    EmptyQuery,

    /// Generic error for other cases
    #[error("Archive error: {0}")]
    Other(String),
}

/// Result type for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;
