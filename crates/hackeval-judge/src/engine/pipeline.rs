//! One job's trip through the engine: fetch, evaluate, score, persist.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use hackeval_core::{
    emit_fetch_completed, emit_job_finished, emit_job_infra_failure, emit_store_error,
    job_span, retry_with_backoff, AnalysisReport, CancelSignal, EvaluationResult, FailureCategory,
    FailureReason, FetchError, JobId, JobState, ResultHeader, RetryPolicy, SandboxError,
    ScoredContent, Submission, Workspace, METRICS,
};
use result_store::StoreError;
use tracing::Instrument;

use super::Shared;
use crate::analyzer::AnalysisError;
use crate::harness::{HarnessError, SuiteOutcome};

/// Why an evaluation attempt stopped short.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error(transparent)]
    Breaker(SandboxError),
}

impl AttemptError {
    fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AttemptError::Analysis(AnalysisError::Cancelled) | AttemptError::Harness(HarnessError::Cancelled)
        )
    }

    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Analysis(AnalysisError::Infrastructure(e)) => e.is_retryable(),
            AttemptError::Analysis(AnalysisError::Workspace(_)) => true,
            AttemptError::Analysis(_) => false,
            AttemptError::Harness(e) => e.is_retryable(),
            AttemptError::Breaker(_) => false,
        }
    }

    /// Whether this counts against the sandbox circuit breaker.
    fn is_sandbox_failure(&self) -> bool {
        matches!(
            self,
            AttemptError::Analysis(AnalysisError::Infrastructure(_))
                | AttemptError::Harness(HarnessError::Infrastructure(_))
        )
    }

    fn code(&self) -> &'static str {
        match self {
            AttemptError::Analysis(AnalysisError::Infrastructure(_))
            | AttemptError::Harness(HarnessError::Infrastructure(_)) => "sandbox_unavailable",
            AttemptError::Analysis(AnalysisError::Workspace(_))
            | AttemptError::Harness(HarnessError::Workspace(_)) => "workspace_io",
            AttemptError::Analysis(AnalysisError::Config(_)) => "checker_config",
            AttemptError::Breaker(_) => "circuit_open",
            AttemptError::Analysis(AnalysisError::Cancelled)
            | AttemptError::Harness(HarnessError::Cancelled) => "cancelled",
        }
    }

    fn to_reason(&self) -> FailureReason {
        if self.is_cancelled() {
            return FailureReason::cancelled();
        }
        FailureReason::new(FailureCategory::Infrastructure, self.code(), self.to_string())
    }
}

/// Entry point for a worker: run the job and record its outcome.
pub(super) async fn run_job(shared: Arc<Shared>, job_id: JobId) {
    let span = job_span(&job_id.to_string());
    async move {
        let started = Instant::now();

        // claim the job; a job cancelled while queued is finished by `cancel`
        let claimed = {
            let mut jobs = shared.jobs.lock().await;
            match jobs.get_mut(&job_id) {
                Some(entry) if !entry.state.is_terminal() && !entry.cancel.is_cancelled() => {
                    let cancel = entry.cancel.signal();
                    let submission = entry.submission.clone();
                    shared
                        .apply(job_id, entry, JobState::Fetching)
                        .then_some((submission, cancel))
                }
                _ => None,
            }
        };
        let Some((submission, cancel)) = claimed else {
            tracing::debug!("job already finished before a worker picked it up");
            return;
        };

        let mut header = ResultHeader::for_submission(job_id, &submission, &shared.config_digest);
        let outcome = with_deadline(&shared, job_id, evaluate(&shared, job_id, &submission, &mut header, &cancel)).await;
        header.finished_at = Utc::now();
        finish(&shared, job_id, header, outcome, started).await;
    }
    .instrument(span)
    .await
}

/// Run `pipeline`, cancelling the job if `engine.job_timeout_ms` passes first.
async fn with_deadline<F>(
    shared: &Shared,
    job_id: JobId,
    pipeline: F,
) -> Result<ScoredContent, FailureReason>
where
    F: std::future::Future<Output = Result<ScoredContent, FailureReason>>,
{
    let Some(timeout_ms) = shared.config.engine.job_timeout_ms else {
        return pipeline.await;
    };
    tokio::pin!(pipeline);
    tokio::select! {
        outcome = &mut pipeline => outcome,
        _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
            tracing::warn!(timeout_ms = timeout_ms, "job deadline passed, cancelling");
            if let Some(entry) = shared.jobs.lock().await.get(&job_id) {
                entry.cancel.cancel();
            }
            // let the pipeline observe the cancel and release its workspace
            let _ = pipeline.await;
            Err(FailureReason::new(
                FailureCategory::Cancelled,
                "deadline_exceeded",
                format!("evaluation exceeded the {timeout_ms} ms job deadline"),
            ))
        }
    }
}

async fn evaluate(
    shared: &Shared,
    job_id: JobId,
    submission: &Submission,
    header: &mut ResultHeader,
    cancel: &CancelSignal,
) -> Result<ScoredContent, FailureReason> {
    let workspace = match shared.fetcher.fetch(&submission.source, cancel).await {
        Ok(workspace) => workspace,
        Err(FetchError::Cancelled) => return Err(FailureReason::cancelled()),
        Err(e) => {
            if e.category() == FailureCategory::Infrastructure {
                emit_job_infra_failure(&job_id.to_string(), &e);
            } else {
                tracing::info!(error = %e, "fetch rejected submission");
            }
            return Err(e.to_reason());
        }
    };
    header.commit = Some(workspace.commit().to_string());
    emit_fetch_completed(
        &job_id.to_string(),
        workspace.commit().as_str(),
        workspace.size_bytes(),
    );

    let outcome = evaluate_workspace(shared, job_id, &workspace, cancel).await;
    if let Err(e) = workspace.destroy() {
        tracing::warn!(error = %e, "failed to remove workspace");
    }
    outcome
}

async fn evaluate_workspace(
    shared: &Shared,
    job_id: JobId,
    workspace: &Workspace,
    cancel: &CancelSignal,
) -> Result<ScoredContent, FailureReason> {
    if !shared.set_state(job_id, JobState::evaluating()).await {
        return Err(FailureReason::cancelled());
    }

    let policy = RetryPolicy::new(
        shared.config.engine.infra_retries.saturating_add(1),
        shared.config.engine.backoff_base_ms,
    );
    let mut analysis: Option<AnalysisReport> = None;
    let mut suite: Option<SuiteOutcome> = None;
    let mut attempt = 1;
    loop {
        match attempt_once(shared, job_id, workspace, cancel, &mut analysis, &mut suite).await {
            Ok(()) => break,
            Err(e) if e.is_cancelled() => return Err(FailureReason::cancelled()),
            Err(e) if attempt < policy.max_attempts && e.is_retryable() => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying evaluation after infrastructure failure"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(FailureReason::cancelled()),
                }
                attempt += 1;
            }
            Err(e) => {
                emit_job_infra_failure(&job_id.to_string(), &e);
                return Err(e.to_reason());
            }
        }
    }

    let (Some(analysis), Some(suite)) = (analysis, suite) else {
        return Err(FailureReason::new(
            FailureCategory::Infrastructure,
            "incomplete_evaluation",
            "evaluation finished without both analysis and test results",
        ));
    };
    if !shared.set_state(job_id, JobState::Scoring).await {
        return Err(FailureReason::cancelled());
    }
    Ok(shared.scorer.score(
        &shared.config.suite.cases,
        suite.executions,
        analysis,
        suite.security_flags,
        suite.diagnostics,
    ))
}

/// Run whichever branches have not produced a result yet, concurrently.
async fn attempt_once(
    shared: &Shared,
    job_id: JobId,
    workspace: &Workspace,
    cancel: &CancelSignal,
    analysis: &mut Option<AnalysisReport>,
    suite: &mut Option<SuiteOutcome>,
) -> Result<(), AttemptError> {
    shared.breaker.check().map_err(AttemptError::Breaker)?;
    let need_analysis = analysis.is_none();
    let need_suite = suite.is_none();

    let (analysed, tested) = tokio::join!(
        async {
            if !need_analysis {
                return None;
            }
            let result = shared
                .analyzer
                .analyze(workspace, shared.sandbox.as_ref(), cancel)
                .await;
            if result.is_ok() {
                mark_branch_done(shared, job_id, Branch::Analysis).await;
            }
            Some(result)
        },
        async {
            if !need_suite {
                return None;
            }
            let result = shared
                .harness
                .run_suite(job_id, workspace, &shared.config.suite, cancel)
                .await;
            if result.is_ok() {
                mark_branch_done(shared, job_id, Branch::Tests).await;
            }
            Some(result)
        },
    );

    let mut failure: Option<AttemptError> = None;
    let mut keep = |err: AttemptError| {
        // cancellation wins over any other failure
        if failure.as_ref().map_or(true, |f| !f.is_cancelled()) {
            failure = Some(err);
        }
    };
    match analysed {
        Some(Ok(report)) => *analysis = Some(report),
        Some(Err(e)) => keep(e.into()),
        None => {}
    }
    match tested {
        Some(Ok(outcome)) => *suite = Some(outcome),
        Some(Err(e)) => keep(e.into()),
        None => {}
    }

    match failure {
        Some(err) => {
            if err.is_sandbox_failure() {
                let failures = shared.breaker.record_failure();
                tracing::warn!(consecutive_failures = failures, error = %err, "sandbox failure");
            }
            Err(err)
        }
        None => {
            shared.breaker.record_success();
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Branch {
    Analysis,
    Tests,
}

async fn mark_branch_done(shared: &Shared, job_id: JobId, branch: Branch) {
    let mut jobs = shared.jobs.lock().await;
    let Some(entry) = jobs.get_mut(&job_id) else {
        return;
    };
    if let JobState::Evaluating {
        analysis_done,
        tests_done,
    } = entry.state
    {
        let next = match branch {
            Branch::Analysis => JobState::Evaluating {
                analysis_done: true,
                tests_done,
            },
            Branch::Tests => JobState::Evaluating {
                analysis_done,
                tests_done: true,
            },
        };
        if next != entry.state {
            shared.apply(job_id, entry, next);
        }
    }
}

/// Assemble, persist and announce the final result of a job.
async fn finish(
    shared: &Shared,
    job_id: JobId,
    header: ResultHeader,
    outcome: Result<ScoredContent, FailureReason>,
    started: Instant,
) {
    let max_score = shared.scorer.max_score();
    let built = match outcome {
        Ok(content) => EvaluationResult::completed(header.clone(), content),
        Err(reason) => EvaluationResult::failed(header.clone(), max_score, reason),
    };
    let result = match built {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "failed to assemble result");
            let reason = FailureReason::new(FailureCategory::Infrastructure, "result_encoding", e.to_string());
            match EvaluationResult::failed(header, max_score, reason) {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "failed to assemble failure result");
                    return;
                }
            }
        }
    };

    let saved = store_result(shared, job_id, &result).await;

    let next = match &result.failure {
        None => JobState::Completed,
        Some(reason) => JobState::Failed {
            reason: reason.clone(),
        },
    };
    {
        let mut jobs = shared.jobs.lock().await;
        if let Some(entry) = jobs.get_mut(&job_id) {
            if !saved {
                entry.unsaved = Some(Box::new(result.clone()));
            }
            shared.apply(job_id, entry, next);
        }
    }

    if result.is_completed() {
        METRICS.inc_jobs_completed();
    } else {
        METRICS.inc_jobs_failed();
    }
    let status = match &result.failure {
        None => "completed".to_string(),
        Some(reason) => format!("failed:{}", reason.code),
    };
    emit_job_finished(
        &job_id.to_string(),
        &status,
        result.composite_score,
        started.elapsed().as_millis() as u64,
    );
}

/// Write the result with bounded retries. Returns whether it was stored.
async fn store_result(shared: &Shared, job_id: JobId, result: &EvaluationResult) -> bool {
    let policy = RetryPolicy::new(
        shared.config.engine.store_attempts,
        shared.config.engine.backoff_base_ms,
    );
    let store = shared.store.as_ref();
    let job = &job_id;
    match retry_with_backoff(&policy, StoreError::is_retryable, move |_| store.put(job, result)).await {
        Ok(()) => true,
        Err(e) => {
            emit_store_error(&job_id.to_string(), &e);
            false
        }
    }
}

/// Record a failed result for a job that never reached the pipeline.
pub(super) async fn finish_unstarted(
    shared: &Shared,
    job_id: JobId,
    submission: &Submission,
    reason: FailureReason,
) {
    let header = ResultHeader::for_submission(job_id, submission, &shared.config_digest);
    finish(shared, job_id, header, Err(reason), Instant::now()).await;
}

/// Record an infrastructure failure for a job whose task panicked.
pub(super) async fn finish_after_panic(shared: &Shared, job_id: JobId) {
    let submission = {
        let jobs = shared.jobs.lock().await;
        match jobs.get(&job_id) {
            Some(entry) if !entry.state.is_terminal() => entry.submission.clone(),
            _ => return,
        }
    };
    let reason = FailureReason::new(
        FailureCategory::Infrastructure,
        "internal_error",
        "evaluation task terminated unexpectedly",
    );
    finish_unstarted(shared, job_id, &submission, reason).await;
}
