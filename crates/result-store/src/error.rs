//! Error types for result-store

use thiserror::Error;

/// Errors from result persistence.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No result recorded for this job.
    #[error("result not found for job {job_id}")]
    NotFound { job_id: String },

    /// A different result already exists under this job id.
    #[error("result for job {job_id} is immutable once written")]
    Immutable { job_id: String },

    /// The result does not belong to the job it was written under.
    #[error("result for job {result_job} cannot be stored under job {job_id}")]
    JobMismatch { job_id: String, result_job: String },

    /// Database connection or query failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Backend failures may succeed on a later attempt; the rest will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
