//! hackeval domain model.
//!
//! Submissions, test cases, violations, execution outcomes, evaluation
//! results, and the job lifecycle state machine. Everything here is plain
//! serializable data; behavior lives in the sandbox, fetch, and judge layers.

pub mod digest;
pub mod error;
pub mod execution;
pub mod job;
pub mod result;
pub mod submission;
pub mod test_case;
pub mod violation;

pub use digest::{canonical_json, compute_digest, digest_of};
pub use error::{FailureCategory, FailureReason, HackevalError, Result};
pub use execution::{ExecutionResult, ExecutionStatus, SecurityFlag, SecurityFlagKind};
pub use job::{JobId, JobState, StateTransition};
pub use result::{
    AnalysisReport, EvaluationResult, EvaluationStatus, ResultHeader, ScoredContent,
    SecurityVerdict, SubScores,
};
pub use submission::{SourceLocation, Submission};
pub use test_case::{OutputCheck, TestCase};
pub use violation::{
    CheckerDiagnostic, CheckerDiagnosticKind, FileRating, FileReport, LanguageSummary, Severity,
    ViolationRecord,
};
