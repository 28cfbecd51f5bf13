//! Domain-level error taxonomy for hackeval.

use serde::{Deserialize, Serialize};

/// Who is responsible for a failure, and therefore how it is surfaced.
///
/// - `Infrastructure`: the engine's fault; retried, then the job fails and
///   operators are alerted. Never scored against the participant.
/// - `Submission`: the participant's code or source could not be evaluated
///   (bad ref, missing entry point, build failure).
/// - `LimitViolation`: a resource or access limit was breached.
/// - `CheckerFailure`: a static-analysis tool misbehaved.
/// - `Cancelled`: an operator or deadline aborted the job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Infrastructure,
    Submission,
    LimitViolation,
    CheckerFailure,
    Cancelled,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCategory::Infrastructure => write!(f, "infrastructure"),
            FailureCategory::Submission => write!(f, "submission"),
            FailureCategory::LimitViolation => write!(f, "limit_violation"),
            FailureCategory::CheckerFailure => write!(f, "checker_failure"),
            FailureCategory::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureReason {
    /// Responsibility category.
    pub category: FailureCategory,

    /// Stable machine-readable code (e.g. "ref_ambiguous", "sandbox_unavailable").
    pub code: String,

    /// Human-readable explanation.
    pub message: String,
}

impl FailureReason {
    pub fn new(category: FailureCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(
            FailureCategory::Cancelled,
            "cancelled",
            "evaluation cancelled before completion",
        )
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.category, self.message)
    }
}

/// hackeval domain errors.
#[derive(Debug, thiserror::Error)]
pub enum HackevalError {
    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("non-canonical value: {0}")]
    NonCanonical(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for hackeval domain operations.
pub type Result<T> = std::result::Result<T, HackevalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_category_display() {
        assert_eq!(FailureCategory::Infrastructure.to_string(), "infrastructure");
        assert_eq!(FailureCategory::Submission.to_string(), "submission");
        assert_eq!(FailureCategory::LimitViolation.to_string(), "limit_violation");
        assert_eq!(FailureCategory::CheckerFailure.to_string(), "checker_failure");
        assert_eq!(FailureCategory::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_failure_reason_display_includes_code_and_category() {
        let reason = FailureReason::new(
            FailureCategory::Submission,
            "ref_ambiguous",
            "branch 'nope' not found",
        );
        let msg = reason.to_string();
        assert!(msg.contains("ref_ambiguous"));
        assert!(msg.contains("submission"));
        assert!(msg.contains("nope"));
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = HackevalError::InvalidTransition {
            from: "completed".to_string(),
            to: "fetching".to_string(),
        };
        assert!(err.to_string().contains("completed -> fetching"));
    }
}
