//! Error types for lsmstore.

use std::io;
use thiserror::Error;

/// Result type alias for lsmstore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage operations.
///
/// A missing or deleted key is never an error; lookups report it as `None`.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Data corruption detected.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The caller violated an API contract (empty key, unsorted input, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Manifest could not be encoded or decoded.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// The base directory is locked by another process.
    #[error("Lock error: {0}")]
    LockError(String),

    /// Engine has been closed.
    #[error("Engine is closed")]
    EngineClosed,

    /// A running compaction was cancelled during shutdown.
    #[error("Compaction cancelled")]
    CompactionCancelled,

    /// Compaction error.
    #[error("Compaction error: {0}")]
    CompactionError(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Manifest(err.to_string())
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a manifest error.
    pub fn manifest<S: Into<String>>(msg: S) -> Self {
        Error::Manifest(msg.into())
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if retrying the operation later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::CompactionCancelled | Error::CompactionError(_)
        )
    }

    /// Check if this error indicates corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::Manifest(_))
    }
}
