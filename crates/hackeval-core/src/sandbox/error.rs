//! Error types for the sandbox module.

use crate::domain::FailureCategory;

/// Errors produced by the sandbox layer.
///
/// Limit breaches and crashes are not errors: they are reported in
/// [`super::SandboxOutcome`]. Errors here mean the sandbox itself could not
/// do its job.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("invalid sandbox request: {0}")]
    InvalidRequest(String),

    #[error("sandbox run cancelled")]
    Cancelled,

    #[error(
        "circuit breaker open: {consecutive_failures} consecutive failures (threshold {threshold})"
    )]
    CircuitBreakerOpen {
        consecutive_failures: u32,
        threshold: u32,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Responsibility category for this error.
    pub fn category(&self) -> FailureCategory {
        match self {
            SandboxError::Cancelled => FailureCategory::Cancelled,
            SandboxError::CommandNotFound(_) | SandboxError::InvalidRequest(_) => {
                FailureCategory::Submission
            }
            SandboxError::Unavailable(_)
            | SandboxError::CircuitBreakerOpen { .. }
            | SandboxError::Io(_) => FailureCategory::Infrastructure,
        }
    }

    /// Whether retrying the same run could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SandboxError::Unavailable(_) | SandboxError::Io(_))
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
