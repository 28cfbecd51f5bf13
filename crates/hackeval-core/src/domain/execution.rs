//! Per-test-case execution outcomes.

use serde::{Deserialize, Serialize};

use super::job::JobId;
use crate::sandbox::LimitKind;

/// Outcome class of one test-case run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pass,
    Fail,
    Timeout,
    Crash,
    LimitExceeded,
}

impl ExecutionStatus {
    pub fn is_pass(&self) -> bool {
        matches!(self, ExecutionStatus::Pass)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Pass => write!(f, "pass"),
            ExecutionStatus::Fail => write!(f, "fail"),
            ExecutionStatus::Timeout => write!(f, "timeout"),
            ExecutionStatus::Crash => write!(f, "crash"),
            ExecutionStatus::LimitExceeded => write!(f, "limit_exceeded"),
        }
    }
}

/// Kind of unauthorized access a run attempted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SecurityFlagKind {
    Network,
    Filesystem,
}

/// Evidence that a sandboxed process tried to cross its boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SecurityFlag {
    pub kind: SecurityFlagKind,
    /// The output line that triggered the flag.
    pub evidence: String,
}

/// Outcome of running one test case. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    /// Job this run belongs to.
    pub job_id: JobId,

    /// Position of the case in the suite.
    pub case_index: usize,

    /// Name of the case.
    pub case_name: String,

    /// Classified outcome.
    pub status: ExecutionStatus,

    /// Which limit was breached, for `Timeout` and `LimitExceeded`.
    pub limit: Option<LimitKind>,

    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,

    /// Terminating signal, when the process was killed by one.
    pub signal: Option<i32>,

    /// Captured stdout (bounded).
    pub stdout: String,

    /// Captured stderr (bounded).
    pub stderr: String,

    pub stdout_truncated: bool,
    pub stderr_truncated: bool,

    /// Wall-clock time in milliseconds.
    pub wall_time_ms: u64,

    /// Peak resident memory of the process tree, in bytes.
    pub peak_memory_bytes: u64,

    /// Boundary-crossing attempts observed during the run.
    pub security_flags: Vec<SecurityFlag>,

    /// Short explanation for non-pass outcomes.
    pub detail: Option<String>,
}

impl ExecutionResult {
    /// A result for a case that was never run (failed build, missing entry).
    pub fn not_run(
        job_id: JobId,
        case_index: usize,
        case_name: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            case_index,
            case_name: case_name.into(),
            status: ExecutionStatus::Crash,
            limit: None,
            exit_code: None,
            signal: None,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            wall_time_ms: 0,
            peak_memory_bytes: 0,
            security_flags: Vec::new(),
            detail: Some(detail.into()),
        }
    }
}
