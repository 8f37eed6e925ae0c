// src/utils/errors.rs
//! Engine error types
//!
//! All fallible engine operations return [`Result`]. Missing entities are
//! expressed as `Option::None` rather than an error variant, and numeric
//! configuration out of bounds is clamped on ingress rather than rejected.

use thiserror::Error;

/// Engine-wide error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input from a caller (bad id, missing field)
    #[error("validation error: {0}")]
    Validation(String),

    /// Task tag with no registered handler
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    /// A task handler ran and failed
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// The worker thread pool never became ready or has shut down
    #[error("worker pool unavailable")]
    PoolUnavailable,

    /// Failed to fork a cluster worker process
    #[error("process spawn failed: {0}")]
    ProcessSpawnFailed(String),

    /// Internal runtime failure
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Engine result alias
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::UnknownTaskType("frobnicate".into());
        assert_eq!(err.to_string(), "unknown task type: frobnicate");

        let err = EngineError::Validation("id must be 1-256 characters".into());
        assert!(err.to_string().starts_with("validation error"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
