//! Storage trait for evaluation results.
//!
//! The engine treats persistence as a capability: `put` a finished result
//! under its job id, `get` it back, list a submission's `history`. Results
//! are written whole in one statement and never modified afterwards.

use async_trait::async_trait;
use hackeval_core::{EvaluationResult, JobId};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Write-once store of [`EvaluationResult`]s keyed by job id.
///
/// Guarantees:
/// - `put` is atomic: readers see the whole result or nothing.
/// - `put` of an identical result under an existing job id is a no-op;
///   a different one is `StoreError::Immutable`.
/// - `get` returns exactly what was `put`.
/// - `history` is ordered by `finished_at`, then job id.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Store `result` under `job_id`, which must equal `result.job_id`.
    async fn put(&self, job_id: &JobId, result: &EvaluationResult) -> StoreResult<()>;

    /// `StoreError::NotFound` if no result exists.
    async fn get(&self, job_id: &JobId) -> StoreResult<EvaluationResult>;

    /// Every result recorded for one submission.
    async fn history(&self, submission_id: &Uuid) -> StoreResult<Vec<EvaluationResult>>;
}

/// Sort key shared by every implementation.
pub(crate) fn history_order(a: &EvaluationResult, b: &EvaluationResult) -> std::cmp::Ordering {
    a.finished_at
        .cmp(&b.finished_at)
        .then_with(|| a.job_id.to_string().cmp(&b.job_id.to_string()))
}

pub(crate) fn check_job(job_id: &JobId, result: &EvaluationResult) -> StoreResult<()> {
    if *job_id != result.job_id {
        return Err(StoreError::JobMismatch {
            job_id: job_id.to_string(),
            result_job: result.job_id.to_string(),
        });
    }
    Ok(())
}
