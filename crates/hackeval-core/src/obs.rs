//! Structured observability hooks for evaluation job lifecycle events.
//!
//! This module provides:
//! - job-scoped tracing spans via the `JobSpan` RAII guard
//! - emission functions for lifecycle events: submitted, state change,
//!   finished, checker failure, sandbox kill, fetch
//!
//! Events are emitted at `info!` level unless noted; filter with `RUST_LOG`.

use tracing::info;

/// RAII guard that enters a job-scoped tracing span.
///
/// ```ignore
/// let _span = JobSpan::enter("0b6c...");
/// // tracing calls below carry job_id = "0b6c..."
/// ```
pub struct JobSpan {
    _span: tracing::span::EnteredSpan,
}

impl JobSpan {
    pub fn enter(job_id: &str) -> Self {
        let span = tracing::info_span!("hackeval.job", job_id = %job_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// A span to attach to a job's future with `Instrument`.
pub fn job_span(job_id: &str) -> tracing::Span {
    tracing::info_span!("hackeval.job", job_id = %job_id)
}

pub fn emit_job_submitted(job_id: &str, participant: &str, repo: &str, reference: &str) {
    info!(
        event = "job.submitted",
        job_id = %job_id,
        participant = %participant,
        repo = %repo,
        reference = %reference,
    );
}

pub fn emit_job_state_changed(job_id: &str, from: &str, to: &str) {
    info!(event = "job.state_changed", job_id = %job_id, from = %from, to = %to);
}

/// Emit event: job reached a terminal state.
pub fn emit_job_finished(job_id: &str, status: &str, composite: f64, duration_ms: u64) {
    info!(
        event = "job.finished",
        job_id = %job_id,
        status = %status,
        composite = composite,
        duration_ms = duration_ms,
    );
}

/// Emit event: infrastructure failure (warning level, operator-visible).
pub fn emit_job_infra_failure(job_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "job.infra_failure", job_id = %job_id, error = %error);
}

pub fn emit_fetch_completed(job_id: &str, commit: &str, bytes: u64) {
    info!(event = "fetch.completed", job_id = %job_id, commit = %commit, bytes = bytes);
}

/// Emit event: a checker contributed nothing (warning level).
pub fn emit_checker_failed(checker: &str, reason: &dyn std::fmt::Display) {
    tracing::warn!(event = "checker.failed", checker = %checker, reason = %reason);
}

pub fn emit_sandbox_killed(pid: i32, reason: &str, wall_time_ms: u64, peak_memory_bytes: u64) {
    info!(
        event = "sandbox.killed",
        pid = pid,
        reason = %reason,
        wall_time_ms = wall_time_ms,
        peak_memory_bytes = peak_memory_bytes,
    );
}

/// Emit event: result persistence failed (warning level).
pub fn emit_store_error(job_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "store.error", job_id = %job_id, error = %error);
}
