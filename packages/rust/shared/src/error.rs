//! Error types for HandbookQA.
//!
//! Library crates use [`HandbookQaError`] via `thiserror`.
//! The CLI app wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all HandbookQA operations.
#[derive(Debug, thiserror::Error)]
pub enum HandbookQaError {
    /// Configuration loading or validation error, including a persisted
    /// vector store whose tag does not match the active configuration.
    #[error("config error: {message}")]
    Config { message: String },

    /// Fetch or text-extraction failure for a source document.
    #[error("ingestion error: {0}")]
    Ingestion(String),

    /// Embedding or generation provider failure after retries are exhausted.
    #[error("provider error: {0}")]
    Provider(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (empty question, bad chunker options, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HandbookQaError>;

impl HandbookQaError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an ingestion error from any displayable message.
    pub fn ingestion(msg: impl Into<String>) -> Self {
        Self::Ingestion(msg.into())
    }

    /// Create a provider error from any displayable message.
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
