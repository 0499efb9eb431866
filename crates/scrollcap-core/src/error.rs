//! Error types for scrollcap.

use thiserror::Error;

use crate::models::FailureKind;

/// Result type alias using scrollcap's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for scrollcap operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Job store operation failed (wraps redis::RedisError)
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// Navigation failed with a classified cause (bad URL, 404, 5xx, ...)
    #[error("Navigation failed: {0}")]
    Navigation(FailureKind),

    /// A capture ran past the configured deadline
    #[error("Capture timed out after {0}s")]
    CaptureTimeout(u64),

    /// A named lock could not be acquired within the configured deadline
    #[error("Lock '{name}' not acquired within {waited_ms}ms")]
    LockTimeout { name: &'static str, waited_ms: u64 },

    /// A job document points at an artifact that no longer exists
    #[error("Artifact missing for job {0}")]
    ArtifactMissing(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Capture engine error (browser launch, CDP command, encoding)
    #[error("Engine error: {0}")]
    Engine(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map this error onto the failure taxonomy recorded in a job's
    /// `failure_reason`. Returns `None` for errors that are not a capture
    /// outcome (store failures, bad config, ...).
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::Navigation(kind) => Some(*kind),
            Error::CaptureTimeout(_) => Some(FailureKind::CaptureTimeout),
            Error::LockTimeout { .. } => Some(FailureKind::LockTimeout),
            Error::Engine(_) => Some(FailureKind::Unknown),
            _ => None,
        }
    }

    /// True for transient failures worth a bounded retry before going
    /// terminal (lock contention, capture deadline).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CaptureTimeout(_) | Error::LockTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
