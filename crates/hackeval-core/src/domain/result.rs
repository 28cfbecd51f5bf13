//! The terminal artifact of an evaluation attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::digest::compute_digest;
use super::error::{FailureReason, Result};
use super::execution::{ExecutionResult, SecurityFlag};
use super::job::JobId;
use super::submission::Submission;
use super::violation::{CheckerDiagnostic, FileReport, LanguageSummary, ViolationRecord};

/// Terminal status of an evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Completed,
    Failed,
}

/// Sub-scores, each in [0, 100].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct SubScores {
    pub correctness: f64,
    pub performance: f64,
    pub quality: f64,
}

/// Security outcome derived from sandbox signals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SecurityVerdict {
    /// Distinct flags across all runs, sorted.
    pub flags: Vec<SecurityFlag>,
    /// Points deducted from the composite.
    pub penalty: f64,
    /// Whether the flags disqualified the submission.
    pub disqualified: bool,
}

/// Static analysis output for one workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AnalysisReport {
    /// Violations in report order.
    pub violations: Vec<ViolationRecord>,
    /// One entry per checker that contributed nothing.
    pub diagnostics: Vec<CheckerDiagnostic>,
    /// Per-file ratings, sorted by path.
    pub files: Vec<FileReport>,
    /// Per-language totals, sorted by language.
    pub languages: Vec<LanguageSummary>,
}

/// Identity and timing shared by every result of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultHeader {
    pub job_id: JobId,
    pub submission_id: Uuid,
    pub participant: String,
    pub hackathon: String,
    pub track: Option<String>,
    pub commit: Option<String>,
    pub config_digest: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ResultHeader {
    pub fn for_submission(job_id: JobId, submission: &Submission, config_digest: &str) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            submission_id: submission.submission_id,
            participant: submission.participant.clone(),
            hackathon: submission.hackathon.clone(),
            track: submission.track.clone(),
            commit: None,
            config_digest: config_digest.to_string(),
            started_at: now,
            finished_at: now,
        }
    }
}

/// Final, immutable scored outcome of one evaluation attempt.
///
/// Determinism is scoped to `result_digest`, not to the whole value.
/// Re-evaluating the same commit under the same config yields a new
/// `job_id`, new timestamps, and freshly measured wall time and memory per
/// case; none of those enter the digest. Scores do, so the performance
/// sub-score (and the digest with it) is only reproducible while every
/// case's time and memory ratios stay at or below the curve's
/// `target_ratio`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub job_id: JobId,
    pub submission_id: Uuid,
    pub participant: String,
    pub hackathon: String,
    pub track: Option<String>,

    /// Pinned commit that was evaluated; `None` if fetching never resolved one.
    pub commit: Option<String>,

    pub status: EvaluationStatus,

    /// Set when `status` is `Failed`.
    pub failure: Option<FailureReason>,

    pub composite_score: f64,
    pub max_score: f64,
    pub sub_scores: SubScores,
    pub security: SecurityVerdict,
    pub analysis: AnalysisReport,

    /// One per test case, in suite order.
    pub executions: Vec<ExecutionResult>,

    /// Explanations of submission-side problems (build failure, missing entry).
    pub submission_diagnostics: Vec<String>,

    pub config_digest: String,

    /// Digest over the reproducible content of this result.
    pub result_digest: String,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Scored content of a completed evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredContent {
    pub composite_score: f64,
    pub max_score: f64,
    pub sub_scores: SubScores,
    pub security: SecurityVerdict,
    pub analysis: AnalysisReport,
    pub executions: Vec<ExecutionResult>,
    pub submission_diagnostics: Vec<String>,
}

impl EvaluationResult {
    /// Assemble a completed result and stamp its digest.
    pub fn completed(header: ResultHeader, content: ScoredContent) -> Result<Self> {
        let mut result = Self {
            job_id: header.job_id,
            submission_id: header.submission_id,
            participant: header.participant,
            hackathon: header.hackathon,
            track: header.track,
            commit: header.commit,
            status: EvaluationStatus::Completed,
            failure: None,
            composite_score: content.composite_score,
            max_score: content.max_score,
            sub_scores: content.sub_scores,
            security: content.security,
            analysis: content.analysis,
            executions: content.executions,
            submission_diagnostics: content.submission_diagnostics,
            config_digest: header.config_digest,
            result_digest: String::new(),
            started_at: header.started_at,
            finished_at: header.finished_at,
        };
        result.result_digest = result.compute_result_digest()?;
        Ok(result)
    }

    /// Assemble a failed result with a zero score.
    pub fn failed(header: ResultHeader, max_score: f64, reason: FailureReason) -> Result<Self> {
        let diagnostics = vec![reason.message.clone()];
        let mut result = Self {
            job_id: header.job_id,
            submission_id: header.submission_id,
            participant: header.participant,
            hackathon: header.hackathon,
            track: header.track,
            commit: header.commit,
            status: EvaluationStatus::Failed,
            failure: Some(reason),
            composite_score: 0.0,
            max_score,
            sub_scores: SubScores::default(),
            security: SecurityVerdict::default(),
            analysis: AnalysisReport::default(),
            executions: Vec::new(),
            submission_diagnostics: diagnostics,
            config_digest: header.config_digest,
            result_digest: String::new(),
            started_at: header.started_at,
            finished_at: header.finished_at,
        };
        result.result_digest = result.compute_result_digest()?;
        Ok(result)
    }

    pub fn is_completed(&self) -> bool {
        self.status == EvaluationStatus::Completed
    }

    /// Digest over everything reproducible: excludes identifiers, timestamps,
    /// raw timings, and captured output.
    pub fn compute_result_digest(&self) -> Result<String> {
        let cases: Vec<serde_json::Value> = self
            .executions
            .iter()
            .map(|e| {
                serde_json::json!({
                    "case": e.case_name,
                    "status": e.status,
                    "limit": e.limit,
                    "exit_code": e.exit_code,
                    "signal": e.signal,
                    "security_flags": e.security_flags,
                })
            })
            .collect();

        let view = serde_json::json!({
            "commit": self.commit,
            "config_digest": self.config_digest,
            "status": self.status,
            "failure": self.failure,
            "composite_score": self.composite_score,
            "max_score": self.max_score,
            "sub_scores": self.sub_scores,
            "security": self.security,
            "violations": self.analysis.violations,
            "checker_diagnostics": self.analysis.diagnostics,
            "cases": cases,
            "submission_diagnostics": self.submission_diagnostics,
        });
        compute_digest(&view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::FailureCategory;
    use crate::domain::execution::ExecutionStatus;
    use crate::domain::submission::SourceLocation;

    fn header() -> ResultHeader {
        let sub = Submission::new("p1", SourceLocation::new("/tmp/repo", "main"), "h1")
            .expect("submission");
        let mut h = ResultHeader::for_submission(JobId::new(), &sub, "cfg");
        h.commit = Some("a".repeat(40));
        h
    }

    fn content() -> ScoredContent {
        let mut exec = ExecutionResult::not_run(JobId::new(), 0, "c0", "x");
        exec.status = ExecutionStatus::Pass;
        exec.wall_time_ms = 12;
        ScoredContent {
            composite_score: 80.0,
            max_score: 100.0,
            sub_scores: SubScores {
                correctness: 100.0,
                performance: 50.0,
                quality: 75.0,
            },
            security: SecurityVerdict::default(),
            analysis: AnalysisReport::default(),
            executions: vec![exec],
            submission_diagnostics: Vec::new(),
        }
    }

    #[test]
    fn test_completed_result_stamps_digest() {
        let r = EvaluationResult::completed(header(), content()).expect("result");
        assert!(r.is_completed());
        assert_eq!(r.result_digest.len(), 64);
        assert_eq!(r.result_digest, r.compute_result_digest().expect("digest"));
    }

    #[test]
    fn test_digest_ignores_ids_and_timings() {
        let a = EvaluationResult::completed(header(), content()).expect("a");
        let mut c = content();
        c.executions[0].wall_time_ms = 999;
        c.executions[0].peak_memory_bytes = 1 << 20;
        let b = EvaluationResult::completed(header(), c).expect("b");
        assert_ne!(a.job_id, b.job_id);
        assert_eq!(a.result_digest, b.result_digest);
    }

    #[test]
    fn test_digest_tracks_scores() {
        let a = EvaluationResult::completed(header(), content()).expect("a");
        let mut c = content();
        c.composite_score = 81.0;
        let b = EvaluationResult::completed(header(), c).expect("b");
        assert_ne!(a.result_digest, b.result_digest);
    }

    #[test]
    fn test_failed_result_has_zero_score_and_reason() {
        let reason = FailureReason::new(FailureCategory::Submission, "ref_ambiguous", "no such ref");
        let r = EvaluationResult::failed(header(), 100.0, reason.clone()).expect("failed");
        assert_eq!(r.status, EvaluationStatus::Failed);
        assert_eq!(r.composite_score, 0.0);
        assert_eq!(r.failure, Some(reason));
        assert_eq!(r.submission_diagnostics, vec!["no such ref".to_string()]);
    }
}
