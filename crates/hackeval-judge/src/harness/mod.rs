//! Test harness: runs the submission against the configured suite inside the
//! sandbox and classifies every case.
//!
//! The harness always returns one [`ExecutionResult`] per case, in suite
//! order. Crashes, limit breaches and mismatches are recorded outcomes; only
//! sandbox infrastructure failures and cancellation abort the suite.

pub mod compare;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::try_join_all;
use hackeval_core::{
    CancelSignal, EngineConfig, ExecutionResult, ExecutionStatus, JobId, LimitKind, OutputCheck,
    ResourceLimits, SandboxError, SandboxOutcome, SandboxRequest, SandboxRunner, SecurityFlag,
    SecurityScanner, SuiteConfig, TestCase, Termination, Workspace,
};
use tokio::sync::Semaphore;

pub use compare::{exact_match, normalize_exact, tokens_match};

/// Environment variables pointing a validator at its inputs.
pub const VALIDATOR_INPUT_ENV: &str = "HACKEVAL_INPUT";
pub const VALIDATOR_OUTPUT_ENV: &str = "HACKEVAL_OUTPUT";
pub const VALIDATOR_EXPECTED_ENV: &str = "HACKEVAL_EXPECTED";

const STDERR_TAIL_CHARS: usize = 300;

/// Errors that abort a suite run.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("harness infrastructure failure: {0}")]
    Infrastructure(SandboxError),

    #[error("suite cancelled")]
    Cancelled,

    #[error("harness workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

impl From<SandboxError> for HarnessError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Cancelled => HarnessError::Cancelled,
            other => HarnessError::Infrastructure(other),
        }
    }
}

impl HarnessError {
    pub fn is_retryable(&self) -> bool {
        match self {
            HarnessError::Infrastructure(e) => e.is_retryable(),
            HarnessError::Workspace(_) => true,
            HarnessError::Cancelled => false,
        }
    }
}

/// Everything a suite run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuiteOutcome {
    /// One per case, in suite order.
    pub executions: Vec<ExecutionResult>,
    /// Submission-side problems (failed build, missing entry point).
    pub diagnostics: Vec<String>,
    /// Flags raised outside any case (the build step).
    pub security_flags: Vec<SecurityFlag>,
}

/// Runs suites through a shared sandbox.
pub struct TestHarness {
    config: Arc<EngineConfig>,
    sandbox: Arc<dyn SandboxRunner>,
    scanner: SecurityScanner,
}

impl TestHarness {
    pub fn new(config: Arc<EngineConfig>, sandbox: Arc<dyn SandboxRunner>) -> Result<Self, HarnessError> {
        let scanner = SecurityScanner::new(&config.sandbox.security_patterns)?;
        Ok(Self {
            config,
            sandbox,
            scanner,
        })
    }

    /// Run every case of `suite` against `workspace`.
    pub async fn run_suite(
        &self,
        job_id: JobId,
        workspace: &Workspace,
        suite: &SuiteConfig,
        cancel: &CancelSignal,
    ) -> Result<SuiteOutcome, HarnessError> {
        if cancel.is_cancelled() {
            return Err(HarnessError::Cancelled);
        }
        let root = workspace.root();
        let mut outcome = SuiteOutcome::default();

        if let Some(build) = &suite.build {
            if let Some(problem) = self.build(build, &root, cancel, &mut outcome).await? {
                tracing::info!(job_id = %job_id, problem = %problem, "build failed, skipping cases");
                outcome.executions = not_run_all(job_id, &suite.cases, "not run: build failed");
                outcome.diagnostics.push(problem);
                return Ok(outcome);
            }
        }

        if let Some(missing) = missing_entry(&suite.entry, &root) {
            let problem = format!("entry point not found: {missing}");
            tracing::info!(job_id = %job_id, entry = %missing, "entry point missing, skipping cases");
            outcome.executions = not_run_all(job_id, &suite.cases, problem.clone());
            outcome.diagnostics.push(problem);
            return Ok(outcome);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.engine.per_job_concurrency.max(1)));
        let runs = suite.cases.iter().enumerate().map(|(idx, case)| {
            let semaphore = Arc::clone(&semaphore);
            let root = root.as_path();
            async move {
                let _permit = semaphore.acquire().await.ok();
                if cancel.is_cancelled() {
                    return Err(HarnessError::Cancelled);
                }
                let scratch = workspace.scratch_dir(&format!("case-{idx}"))?;
                self.run_case(job_id, idx, case, &suite.entry, root, &scratch, workspace, cancel)
                    .await
            }
        });
        outcome.executions = try_join_all(runs).await?;

        let passed = outcome
            .executions
            .iter()
            .filter(|e| e.status.is_pass())
            .count();
        tracing::debug!(
            job_id = %job_id,
            cases = outcome.executions.len(),
            passed = passed,
            "suite finished"
        );
        Ok(outcome)
    }

    /// Run the build step. `Ok(Some(problem))` is a submission-side failure.
    async fn build(
        &self,
        command: &[String],
        root: &Path,
        cancel: &CancelSignal,
        outcome: &mut SuiteOutcome,
    ) -> Result<Option<String>, HarnessError> {
        let request = SandboxRequest::new(command.to_vec(), root);
        let run = match self
            .sandbox
            .run(request, &self.config.build_limits(), cancel)
            .await
        {
            Ok(run) => run,
            Err(SandboxError::CommandNotFound(program)) => {
                return Ok(Some(format!("build command not found: {program}")))
            }
            Err(SandboxError::InvalidRequest(msg)) => {
                return Ok(Some(format!("build could not start: {msg}")))
            }
            Err(e) => return Err(e.into()),
        };

        outcome.security_flags.extend(self.scanner.scan(&run.stderr));
        if let Some(kind) = run.limit_exceeded() {
            return Ok(Some(format!("build exceeded its {kind} limit")));
        }
        match run.termination {
            Termination::Exited { code: 0 } => Ok(None),
            Termination::Exited { code } => Ok(Some(format!(
                "build failed with exit code {code}: {}",
                tail(&run.stderr)
            ))),
            Termination::Signaled { signal } => {
                Ok(Some(format!("build killed by signal {signal}")))
            }
            Termination::Killed { .. } => Err(HarnessError::Cancelled),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_case(
        &self,
        job_id: JobId,
        idx: usize,
        case: &TestCase,
        entry: &[String],
        root: &Path,
        scratch: &Path,
        workspace: &Workspace,
        cancel: &CancelSignal,
    ) -> Result<ExecutionResult, HarnessError> {
        let mut command = entry.to_vec();
        command.extend(case.args.iter().cloned());
        let limits = self.config.limits_for(case);
        let request = SandboxRequest::new(command, root)
            .with_writable_dir(scratch)
            .with_stdin(case.input.as_bytes());

        let run = match self.sandbox.run(request, &limits, cancel).await {
            Ok(run) => run,
            Err(SandboxError::CommandNotFound(program)) => {
                return Ok(ExecutionResult::not_run(
                    job_id,
                    idx,
                    &case.name,
                    format!("command not found: {program}"),
                ))
            }
            Err(SandboxError::InvalidRequest(msg)) => {
                return Ok(ExecutionResult::not_run(job_id, idx, &case.name, msg))
            }
            Err(e) => return Err(e.into()),
        };

        let mut result = record(job_id, idx, &case.name, &run);
        result.security_flags = self.scanner.scan(&run.stderr);

        if let Some(kind) = run.limit_exceeded() {
            result.limit = Some(kind);
            result.status = match kind {
                LimitKind::Time => ExecutionStatus::Timeout,
                LimitKind::Memory | LimitKind::Output => ExecutionStatus::LimitExceeded,
            };
            result.detail = Some(limit_detail(kind, &limits));
            return Ok(result);
        }

        match run.termination {
            Termination::Exited { code: 0 } => {}
            Termination::Exited { code } => {
                result.status = ExecutionStatus::Crash;
                result.detail = Some(format!("exit code {code}"));
                return Ok(result);
            }
            Termination::Signaled { signal } => {
                result.status = ExecutionStatus::Crash;
                result.detail = Some(format!("killed by signal {signal}"));
                return Ok(result);
            }
            Termination::Killed { .. } => return Err(HarnessError::Cancelled),
        }

        let (status, detail) = match &case.check {
            OutputCheck::Exact { expected } => judge(exact_match(&run.stdout, expected), "output differs"),
            OutputCheck::Tokens { expected, epsilon } => judge(
                tokens_match(&run.stdout, expected, *epsilon),
                "output tokens differ",
            ),
            OutputCheck::Validator { command, expected } => {
                self.validate(idx, case, command, expected.as_deref(), &run.stdout, root, workspace, cancel)
                    .await?
            }
        };
        result.status = status;
        result.detail = detail;
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn validate(
        &self,
        idx: usize,
        case: &TestCase,
        command: &[String],
        expected: Option<&str>,
        actual: &str,
        root: &Path,
        workspace: &Workspace,
        cancel: &CancelSignal,
    ) -> Result<(ExecutionStatus, Option<String>), HarnessError> {
        let dir = workspace.scratch_dir(&format!("validator-{idx}"))?;
        let input = write_file(&dir, "input", &case.input)?;
        let output = write_file(&dir, "output", actual)?;
        let expected = write_file(&dir, "expected", expected.unwrap_or(""))?;

        let request = SandboxRequest::new(command.to_vec(), root)
            .with_writable_dir(&dir)
            .with_env(VALIDATOR_INPUT_ENV, input.to_string_lossy())
            .with_env(VALIDATOR_OUTPUT_ENV, output.to_string_lossy())
            .with_env(VALIDATOR_EXPECTED_ENV, expected.to_string_lossy());
        let limits = self.config.limits_for(case);
        let run = self.sandbox.run(request, &limits, cancel).await?;

        if let Some(kind) = run.limit_exceeded() {
            return Ok((
                ExecutionStatus::Fail,
                Some(format!("validator exceeded its {kind} limit")),
            ));
        }
        Ok(match run.termination {
            Termination::Exited { code: 0 } => (ExecutionStatus::Pass, None),
            Termination::Exited { code } => (
                ExecutionStatus::Fail,
                Some(format!("validator rejected output (exit code {code})")),
            ),
            Termination::Signaled { signal } => (
                ExecutionStatus::Fail,
                Some(format!("validator killed by signal {signal}")),
            ),
            Termination::Killed { .. } => return Err(HarnessError::Cancelled),
        })
    }
}

fn judge(matched: bool, mismatch: &str) -> (ExecutionStatus, Option<String>) {
    if matched {
        (ExecutionStatus::Pass, None)
    } else {
        (ExecutionStatus::Fail, Some(mismatch.to_string()))
    }
}

fn record(job_id: JobId, idx: usize, name: &str, run: &SandboxOutcome) -> ExecutionResult {
    ExecutionResult {
        job_id,
        case_index: idx,
        case_name: name.to_string(),
        status: ExecutionStatus::Pass,
        limit: None,
        exit_code: run.exit_code,
        signal: run.signal,
        stdout: run.stdout.clone(),
        stderr: run.stderr.clone(),
        stdout_truncated: run.stdout_truncated,
        stderr_truncated: run.stderr_truncated,
        wall_time_ms: run.wall_time_ms,
        peak_memory_bytes: run.peak_memory_bytes,
        security_flags: Vec::new(),
        detail: None,
    }
}

fn limit_detail(kind: LimitKind, limits: &ResourceLimits) -> String {
    match kind {
        LimitKind::Time => format!("exceeded time limit of {} ms", limits.time_ms),
        LimitKind::Memory => format!("exceeded memory limit of {} MiB", limits.memory_mb),
        LimitKind::Output => format!("exceeded output limit of {} bytes", limits.output_bytes),
    }
}

fn not_run_all(job_id: JobId, cases: &[TestCase], detail: impl Into<String>) -> Vec<ExecutionResult> {
    let detail = detail.into();
    cases
        .iter()
        .enumerate()
        .map(|(idx, case)| ExecutionResult::not_run(job_id, idx, &case.name, detail.clone()))
        .collect()
}

fn write_file(dir: &Path, name: &str, contents: &str) -> std::io::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, contents)?;
    Ok(path)
}

fn tail(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    trimmed
        .chars()
        .skip(count.saturating_sub(STDERR_TAIL_CHARS))
        .collect()
}

/// The workspace file the entry command runs, if it names one.
///
/// `./run.sh` is itself the file; for `python3 main.py` or `node app/index.js`
/// it is the first non-flag argument that looks like a relative path. Inline
/// code (`-c`, `-e`) and module (`-m`) invocations name no file.
pub fn entry_file(entry: &[String]) -> Option<&str> {
    let (program, args) = entry.split_first()?;
    if program.starts_with("./") {
        return Some(program.as_str());
    }
    for arg in args {
        if matches!(arg.as_str(), "-c" | "-e" | "-m") {
            return None;
        }
        if arg.starts_with('-') {
            continue;
        }
        if Path::new(arg).is_absolute() {
            return None;
        }
        return (arg.contains('/') || arg.contains('.')).then_some(arg.as_str());
    }
    None
}

fn missing_entry(entry: &[String], root: &Path) -> Option<String> {
    if entry.is_empty() {
        return Some("<empty entry command>".to_string());
    }
    let file = entry_file(entry)?;
    (!root.join(file).exists()).then(|| file.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_entry_file_detection() {
        assert_eq!(entry_file(&cmd(&["./run.sh"])), Some("./run.sh"));
        assert_eq!(entry_file(&cmd(&["python3", "main.py"])), Some("main.py"));
        assert_eq!(entry_file(&cmd(&["node", "--stack-size=800", "app/index.js"])), Some("app/index.js"));
        assert_eq!(entry_file(&cmd(&["python3", "-m", "app.main"])), None);
        assert_eq!(entry_file(&cmd(&["sh", "-c", "echo 1. done"])), None);
        assert_eq!(entry_file(&cmd(&["/usr/bin/env"])), None);
        assert_eq!(entry_file(&cmd(&["java", "Main"])), None);
    }

    #[test]
    fn test_missing_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("main.py"), "print(5)").expect("write");
        assert_eq!(missing_entry(&cmd(&["python3", "main.py"]), dir.path()), None);
        assert_eq!(
            missing_entry(&cmd(&["python3", "solve.py"]), dir.path()),
            Some("solve.py".to_string())
        );
        assert!(missing_entry(&[], dir.path()).is_some());
    }

    #[test]
    fn test_limit_detail_mentions_limit() {
        let limits = ResourceLimits::default();
        assert!(limit_detail(LimitKind::Time, &limits).contains("2000 ms"));
        assert!(limit_detail(LimitKind::Memory, &limits).contains("256 MiB"));
    }
}
