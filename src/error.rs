//! Error types for archive operations.

use thiserror::Error;

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during archive operations.
///
/// Plugin code returns these; the host boundary turns them into status codes
/// (`S_FALSE` from `Open`, a data-error operation result from `Extract`,
/// `E_ABORT` or `E_FAIL` from `UpdateItems`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The archive format is not recognized or is corrupted.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
    /// The requested item index is out of bounds.
    #[error("index {index} out of bounds (count: {count})")]
    IndexOutOfBounds { index: usize, count: usize },
    /// A required feature is not supported.
    #[error("not supported: {0}")]
    NotSupported(String),
    /// A class or interface identifier could not be parsed.
    #[error("invalid GUID {0}")]
    InvalidGuid(String),
    /// The host asked to stop.
    #[error("operation cancelled")]
    Cancelled,
    /// Generic error with a message.
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
