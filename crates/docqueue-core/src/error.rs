//! Error types for docqueue.

use thiserror::Error;

/// Result type alias using docqueue's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for docqueue operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// An operation exceeded its time budget
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Extraction collaborator does not handle this document type
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Text extraction failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Extraction succeeded but produced no usable text
    #[error("No text extracted")]
    EmptyExtraction,

    /// Embedding backend rejected the request due to rate limiting
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Chunk index operation failed
    #[error("Index error: {0}")]
    Index(String),

    /// Document storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Notification channel operation failed
    #[error("Notification error: {0}")]
    Notification(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a caller may retry the failed call with backoff.
    ///
    /// Only rate limits and timeouts qualify. Everything else is returned to
    /// the caller immediately and handled by the job's attempts budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited(_) | Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}
