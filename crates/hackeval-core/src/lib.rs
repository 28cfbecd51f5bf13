//! hackeval core library
//!
//! Domain model, engine configuration, the sandbox runner every untrusted
//! command goes through, and the fetcher that materializes submissions.

pub mod config;
pub mod domain;
pub mod fetch;
pub mod metrics;
pub mod obs;
pub mod sandbox;
pub mod telemetry;

pub use config::{
    CheckerPreset, CheckerSpec, ConfigError, EngineConfig, EngineSection, FetchSection,
    IsolationMode, LimitsSection, LintConfig, OutputFormat, PerformanceCurve, QualityCurve,
    SandboxSection, ScoringConfig, ScoringWeights, SecurityPattern, SecurityPolicy,
    SeverityWeights, SuiteConfig, WEIGHT_TOTAL,
};

pub use domain::{
    canonical_json, compute_digest, digest_of, AnalysisReport, CheckerDiagnostic,
    CheckerDiagnosticKind, EvaluationResult, EvaluationStatus, ExecutionResult, ExecutionStatus,
    FailureCategory, FailureReason, FileRating, FileReport, HackevalError, JobId, JobState,
    LanguageSummary, OutputCheck, Result, ResultHeader, ScoredContent, SecurityFlag,
    SecurityFlagKind, SecurityVerdict, Severity, SourceLocation, StateTransition, SubScores,
    Submission, TestCase, ViolationRecord,
};

pub use fetch::{
    CommitHash, FetchError, Fetcher, GitSourceProvider, SourceProvider, Workspace,
};

pub use sandbox::{
    cancel_pair, retry_with_backoff, CancelHandle, CancelSignal, CircuitBreaker, KillReason,
    LimitKind, LimitOverrides, NetworkPolicy, ProcessSandbox, ResourceLimits, RetryPolicy,
    SandboxCapabilities, SandboxError, SandboxOutcome, SandboxRequest, SandboxResult,
    SandboxRunner, SecurityScanner, Termination,
};

pub use metrics::METRICS;
pub use obs::{
    emit_checker_failed, emit_fetch_completed, emit_job_finished, emit_job_infra_failure,
    emit_job_state_changed, emit_job_submitted, emit_sandbox_killed, emit_store_error, job_span,
    JobSpan,
};
pub use telemetry::init_tracing;
