//! Error kinds shared by every layer of refchat.
//!
//! Each variant is a distinct failure kind; the HTTP layer maps every kind
//! to its own status code, so callers must never collapse one kind into
//! another.

use thiserror::Error;

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured failure returned by index, retriever and collaborator calls.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Bad input: empty query, chunk size of zero, out-of-range `top_k`.
    #[error("{0}")]
    Validation(String),

    /// Unknown filename on delete/info/chunks lookup.
    #[error("{0}")]
    NotFound(String),

    /// A vector whose length disagrees with the index dimension.
    #[error("dimension mismatch: index expects {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding model or language model not reachable.
    #[error("{0}")]
    DependencyUnavailable(String),

    /// An external collaborator did not answer in time.
    #[error("{0}")]
    Timeout(String),

    /// File type the extractor does not handle.
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    /// The extractor recognised the file type but could not read it.
    #[error("text extraction failed: {0}")]
    ExtractionFailed(String),

    /// Anything else (I/O, join failures, malformed backend responses).
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Machine-readable code for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::NotFound(_) => "not_found",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::DependencyUnavailable(_) => "dependency_unavailable",
            Error::Timeout(_) => "timeout",
            Error::UnsupportedType(_) => "unsupported_type",
            Error::ExtractionFailed(_) => "extraction_failed",
            Error::Internal(_) => "internal",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Error::DependencyUnavailable(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
