//! Error types for fetching submissions.

use crate::domain::{FailureCategory, FailureReason};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("reference '{reference}' matched {matches} commits (expected exactly one)")]
    RefAmbiguous { reference: String, matches: usize },

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("workspace exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("repository host not allowed: {0}")]
    HostNotAllowed(String),

    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("workspace io error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::NotFound(_) => "not_found",
            FetchError::RefAmbiguous { .. } => "ref_ambiguous",
            FetchError::NetworkFailure(_) => "network_failure",
            FetchError::PayloadTooLarge { .. } => "payload_too_large",
            FetchError::HostNotAllowed(_) => "host_not_allowed",
            FetchError::InvalidArchive(_) => "invalid_archive",
            FetchError::Workspace(_) => "workspace_io",
            FetchError::Cancelled => "cancelled",
        }
    }

    pub fn category(&self) -> FailureCategory {
        match self {
            FetchError::NetworkFailure(_) | FetchError::Workspace(_) => {
                FailureCategory::Infrastructure
            }
            FetchError::Cancelled => FailureCategory::Cancelled,
            _ => FailureCategory::Submission,
        }
    }

    /// Only network failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::NetworkFailure(_))
    }

    pub fn to_reason(&self) -> FailureReason {
        FailureReason::new(self.category(), self.code(), self.to_string())
    }
}
