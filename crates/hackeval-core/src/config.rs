//! Engine configuration.
//!
//! One TOML document describes a hackathon's rules: worker pool sizing,
//! sandbox isolation, fetch policy, default limits, network policy, scoring
//! weights and curves, lint checkers, and the test suite. It is parsed and
//! validated once at startup, then shared read-only as `Arc<EngineConfig>`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::digest::digest_of;
use crate::domain::{OutputCheck, SecurityFlagKind, Severity, TestCase};
use crate::sandbox::{NetworkPolicy, ResourceLimits};

/// Scoring weights must sum to this.
pub const WEIGHT_TOTAL: u32 = 100;

/// Configuration errors. `key` is the dotted path of the offending setting.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

fn invalid(key: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.into(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// [engine]
// ---------------------------------------------------------------------------

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

/// Worker pool, queue, and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSection {
    /// Concurrent evaluation jobs.
    pub workers: usize,
    /// Jobs that may wait for a worker before `submit` is refused.
    pub queue_capacity: usize,
    /// Concurrent sandboxed test cases within one job.
    pub per_job_concurrency: usize,
    /// Parent directory for workspaces; the system temp dir when unset.
    pub workspace_root: Option<PathBuf>,
    /// Extra attempts for infrastructure failures during evaluation.
    pub infra_retries: u32,
    pub backoff_base_ms: u64,
    /// Consecutive sandbox infrastructure failures before jobs fail fast.
    pub breaker_threshold: u32,
    /// Attempts to persist a result before giving up.
    pub store_attempts: u32,
    /// Optional hard deadline per job; the job is cancelled when it passes.
    pub job_timeout_ms: Option<u64>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: 64,
            per_job_concurrency: 4,
            workspace_root: None,
            infra_retries: 2,
            backoff_base_ms: 200,
            breaker_threshold: 5,
            store_attempts: 3,
            job_timeout_ms: None,
        }
    }
}

// ---------------------------------------------------------------------------
// [sandbox]
// ---------------------------------------------------------------------------

/// How hard the sandbox insists on kernel isolation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Refuse to run unless Landlock filesystem and network rules are
    /// fully enforced.
    #[default]
    Strict,
    /// Run with whatever the kernel supports.
    BestEffort,
}

/// A stderr pattern that marks an unauthorized access attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityPattern {
    pub kind: SecurityFlagKind,
    pub pattern: String,
}

fn default_security_patterns() -> Vec<SecurityPattern> {
    let net = [
        r"(?i)permission denied.*(connect|socket|bind)",
        r"(?i)(connect|socket|bind)\(?\)?.*(permission denied|operation not permitted)",
        r"(?i)PermissionError: \[Errno 13\].*(connect|socket)",
        r"(?i)EACCES.*(connect|listen)",
        r"(?i)\b(connect|listen) EACCES\b",
        // a denied connect() carries no path; Python names the call on an
        // earlier traceback line
        r"(?i)PermissionError: \[Errno 13\] Permission denied\s*$",
        r"(?i)urlopen error \[Errno 13\]",
        r"(?i)connection.*\[Errno 13\] Permission denied",
    ];
    let fs = [
        r"(?i)(read-only file system|EROFS)",
        r"(?i)cannot (create|open|write|remove|touch) '?/[^:]*'?: permission denied",
        r"(?im)^\S*sh: (line \d+: )?/[^:]*: permission denied",
        r"(?i)PermissionError: \[Errno 13\] Permission denied: '/",
        r"(?i)EACCES: permission denied, (open|mkdir|unlink|rename|rmdir) '/",
    ];
    net.iter()
        .map(|p| SecurityPattern {
            kind: SecurityFlagKind::Network,
            pattern: p.to_string(),
        })
        .chain(fs.iter().map(|p| SecurityPattern {
            kind: SecurityFlagKind::Filesystem,
            pattern: p.to_string(),
        }))
        .collect()
}

/// Sandbox isolation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxSection {
    pub mode: IsolationMode,
    /// `RLIMIT_AS` = memory limit × this factor; 0 disables the rlimit.
    /// Runtimes that reserve large virtual heaps (JVM, V8) need it off or generous.
    pub address_space_factor: f64,
    /// Interval between process-tree RSS samples.
    pub memory_poll_ms: u64,
    /// `RLIMIT_NPROC` for sandboxed processes. The kernel counts this per
    /// user, so it must leave room for everything else the engine user runs.
    pub max_processes: Option<u64>,
    /// `RLIMIT_FSIZE`: largest file a sandboxed process may write.
    pub max_file_bytes: u64,
    /// Upper bound on waiting for group members to disappear after a kill.
    pub reap_timeout_ms: u64,
    pub security_patterns: Vec<SecurityPattern>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            mode: IsolationMode::Strict,
            address_space_factor: 0.0,
            memory_poll_ms: 20,
            max_processes: Some(4096),
            max_file_bytes: 64 * 1024 * 1024,
            reap_timeout_ms: 500,
            security_patterns: default_security_patterns(),
        }
    }
}

// ---------------------------------------------------------------------------
// [fetch]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchSection {
    /// Total attempts for network failures.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// Unpacked workspace size cap.
    pub max_workspace_bytes: u64,
    /// Permitted repository hosts; empty allows any (including local paths).
    pub allowed_hosts: Vec<String>,
    /// Timeout for each git invocation.
    pub git_timeout_ms: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 250,
            max_workspace_bytes: 200 * 1024 * 1024,
            allowed_hosts: Vec::new(),
            git_timeout_ms: 120_000,
        }
    }
}

// ---------------------------------------------------------------------------
// [limits]
// ---------------------------------------------------------------------------

/// Default limits applied to every sandboxed run unless overridden.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsSection {
    pub time_ms: u64,
    pub memory_mb: u64,
    pub output_bytes: u64,
    /// Limit for the suite's build step.
    pub build_time_ms: u64,
    /// Limit for each lint checker invocation.
    pub checker_time_ms: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            time_ms: 2_000,
            memory_mb: 256,
            output_bytes: 64 * 1024,
            build_time_ms: 120_000,
            checker_time_ms: 60_000,
        }
    }
}

// ---------------------------------------------------------------------------
// [scoring]
// ---------------------------------------------------------------------------

/// Sub-score weights; must sum to [`WEIGHT_TOTAL`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoringWeights {
    pub correctness: u32,
    pub performance: u32,
    pub quality: u32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            correctness: 60,
            performance: 15,
            quality: 25,
        }
    }
}

impl ScoringWeights {
    pub fn total(&self) -> u32 {
        self.correctness + self.performance + self.quality
    }
}

/// Piecewise-linear performance curve over usage/limit ratios.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceCurve {
    /// Ratios at or below this score full marks.
    pub target_ratio: f64,
    /// Share of the per-case score driven by time; the rest by memory.
    pub time_share: f64,
}

impl Default for PerformanceCurve {
    fn default() -> Self {
        Self {
            target_ratio: 0.25,
            time_share: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeverityWeights {
    pub error: f64,
    pub warning: f64,
    pub hint: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            error: 5.0,
            warning: 2.0,
            hint: 0.5,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Error => self.error,
            Severity::Warning => self.warning,
            Severity::Hint => self.hint,
        }
    }
}

/// Quality = 100 × half_life / (half_life + Σ severity weights).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityCurve {
    pub half_life: f64,
    pub severity_weights: SeverityWeights,
}

impl Default for QualityCurve {
    fn default() -> Self {
        Self {
            half_life: 20.0,
            severity_weights: SeverityWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityPolicy {
    pub penalty_per_flag: f64,
    /// Any flag zeroes the composite.
    pub disqualify: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            penalty_per_flag: 10.0,
            disqualify: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub max_score: f64,
    pub performance: PerformanceCurve,
    pub quality: QualityCurve,
    pub security: SecurityPolicy,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            max_score: 100.0,
            performance: PerformanceCurve::default(),
            quality: QualityCurve::default(),
            security: SecurityPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// [lint]
// ---------------------------------------------------------------------------

/// Built-in checker definitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckerPreset {
    Pylint,
    Flake8,
    Eslint,
    Htmlhint,
    Stylelint,
    Checkstyle,
}

/// How a checker's stdout is parsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputFormat {
    /// `path:line:col: MSGID (category) message`
    Pylint,
    /// `path:line:col: CODE message`
    Flake8,
    /// `path:line:col: message [severity/rule]`
    Unix,
    /// ESLint `--format json`.
    EslintJson,
    /// `[SEVERITY] path:line:col: message [Rule]`
    Checkstyle,
    /// Named groups: `file`, `message`, and optionally `line`, `col`, `severity`, `rule`.
    Regex { pattern: String },
}

/// One configured checker.
///
/// Command arguments may contain `$CONFIG_DIR` (the per-job linter config
/// directory); an argument that is exactly `$FILES` expands to the matched
/// files. Unset fields fall back to the preset's.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CheckerSpec {
    pub name: String,
    pub preset: Option<CheckerPreset>,
    pub command: Vec<String>,
    /// File extensions (without the dot) this checker receives.
    pub extensions: Vec<String>,
    pub language: Option<String>,
    pub format: Option<OutputFormat>,
    /// Rule id → severity, applied after parsing.
    pub severity_overrides: BTreeMap<String, Severity>,
    /// Rule ids dropped after parsing.
    pub disabled_rules: Vec<String>,
    /// Overrides `limits.checker_time_ms`.
    pub time_ms: Option<u64>,
}

impl CheckerSpec {
    pub fn preset(name: impl Into<String>, preset: CheckerPreset) -> Self {
        Self {
            name: name.into(),
            preset: Some(preset),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LintConfig {
    pub checkers: Vec<CheckerSpec>,
    pub max_violations_per_checker: usize,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            checkers: Vec::new(),
            max_violations_per_checker: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// [suite]
// ---------------------------------------------------------------------------

/// The hidden/sample test suite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SuiteConfig {
    /// Run once before any case, with a writable workspace.
    pub build: Option<Vec<String>>,
    /// Command that runs the submission; case args are appended.
    pub entry: Vec<String>,
    pub cases: Vec<TestCase>,
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// The whole engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub sandbox: SandboxSection,
    pub fetch: FetchSection,
    pub limits: LimitsSection,
    pub network: NetworkPolicy,
    pub scoring: ScoringConfig,
    pub lint: LintConfig,
    pub suite: SuiteConfig,
}

impl EngineConfig {
    /// Read, parse, and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Arc<Self>, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Arc<Self>, ConfigError> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(Arc::new(config))
    }

    /// Default limits for test cases.
    pub fn default_limits(&self) -> ResourceLimits {
        ResourceLimits {
            time_ms: self.limits.time_ms,
            memory_mb: self.limits.memory_mb,
            output_bytes: self.limits.output_bytes,
            network: self.network.clone(),
        }
    }

    /// Effective limits for one case.
    pub fn limits_for(&self, case: &TestCase) -> ResourceLimits {
        self.default_limits().with_overrides(&case.limits)
    }

    /// Limits for the build step.
    pub fn build_limits(&self) -> ResourceLimits {
        ResourceLimits {
            time_ms: self.limits.build_time_ms,
            ..self.default_limits()
        }
    }

    /// Limits for a lint checker.
    pub fn checker_limits(&self, spec: &CheckerSpec) -> ResourceLimits {
        ResourceLimits {
            time_ms: spec.time_ms.unwrap_or(self.limits.checker_time_ms),
            network: NetworkPolicy::Deny,
            ..self.default_limits()
        }
    }

    /// SHA-256 of the canonical JSON of this configuration.
    pub fn config_digest(&self) -> Result<String, ConfigError> {
        digest_of(self).map_err(|e| invalid("<config>", e.to_string()))
    }

    /// Check every invariant the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_engine()?;
        self.validate_sandbox()?;
        self.validate_fetch()?;
        self.validate_limits()?;
        self.validate_scoring()?;
        self.validate_lint()?;
        self.validate_suite()?;
        Ok(())
    }

    fn validate_engine(&self) -> Result<(), ConfigError> {
        let e = &self.engine;
        if e.workers == 0 {
            return Err(invalid("engine.workers", "must be at least 1"));
        }
        if e.queue_capacity == 0 {
            return Err(invalid("engine.queue_capacity", "must be at least 1"));
        }
        if e.per_job_concurrency == 0 {
            return Err(invalid("engine.per_job_concurrency", "must be at least 1"));
        }
        if e.breaker_threshold == 0 {
            return Err(invalid("engine.breaker_threshold", "must be at least 1"));
        }
        if e.store_attempts == 0 {
            return Err(invalid("engine.store_attempts", "must be at least 1"));
        }
        if e.job_timeout_ms == Some(0) {
            return Err(invalid("engine.job_timeout_ms", "must be positive"));
        }
        Ok(())
    }

    fn validate_sandbox(&self) -> Result<(), ConfigError> {
        let s = &self.sandbox;
        if !s.address_space_factor.is_finite() || s.address_space_factor < 0.0 {
            return Err(invalid("sandbox.address_space_factor", "must be >= 0"));
        }
        if s.address_space_factor > 0.0 && s.address_space_factor < 1.0 {
            return Err(invalid(
                "sandbox.address_space_factor",
                "must be 0 (disabled) or at least 1",
            ));
        }
        if s.memory_poll_ms == 0 {
            return Err(invalid("sandbox.memory_poll_ms", "must be positive"));
        }
        if s.max_processes == Some(0) {
            return Err(invalid("sandbox.max_processes", "must be positive"));
        }
        if s.max_file_bytes == 0 {
            return Err(invalid("sandbox.max_file_bytes", "must be positive"));
        }
        for (i, p) in s.security_patterns.iter().enumerate() {
            regex::Regex::new(&p.pattern).map_err(|e| {
                invalid(format!("sandbox.security_patterns[{i}].pattern"), e.to_string())
            })?;
        }
        Ok(())
    }

    fn validate_fetch(&self) -> Result<(), ConfigError> {
        if self.fetch.max_attempts == 0 {
            return Err(invalid("fetch.max_attempts", "must be at least 1"));
        }
        if self.fetch.max_workspace_bytes == 0 {
            return Err(invalid("fetch.max_workspace_bytes", "must be positive"));
        }
        if self.fetch.git_timeout_ms == 0 {
            return Err(invalid("fetch.git_timeout_ms", "must be positive"));
        }
        Ok(())
    }

    fn validate_limits(&self) -> Result<(), ConfigError> {
        if let Some(field) = self.default_limits().first_invalid() {
            return Err(invalid(format!("limits.{field}"), "must be positive"));
        }
        if self.limits.build_time_ms == 0 {
            return Err(invalid("limits.build_time_ms", "must be positive"));
        }
        if self.limits.checker_time_ms == 0 {
            return Err(invalid("limits.checker_time_ms", "must be positive"));
        }
        Ok(())
    }

    fn validate_scoring(&self) -> Result<(), ConfigError> {
        let s = &self.scoring;
        if s.weights.total() != WEIGHT_TOTAL {
            return Err(invalid(
                "scoring.weights",
                format!("must sum to {WEIGHT_TOTAL}, got {}", s.weights.total()),
            ));
        }
        if !s.max_score.is_finite() || s.max_score <= 0.0 {
            return Err(invalid("scoring.max_score", "must be a positive number"));
        }
        let p = &s.performance;
        if !(0.0..1.0).contains(&p.target_ratio) {
            return Err(invalid("scoring.performance.target_ratio", "must be in [0, 1)"));
        }
        if !(0.0..=1.0).contains(&p.time_share) {
            return Err(invalid("scoring.performance.time_share", "must be in [0, 1]"));
        }
        let q = &s.quality;
        if !q.half_life.is_finite() || q.half_life <= 0.0 {
            return Err(invalid("scoring.quality.half_life", "must be positive"));
        }
        let w = &q.severity_weights;
        for (key, value) in [("error", w.error), ("warning", w.warning), ("hint", w.hint)] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(
                    format!("scoring.quality.severity_weights.{key}"),
                    "must be >= 0",
                ));
            }
        }
        let sec = &s.security;
        if !sec.penalty_per_flag.is_finite() || sec.penalty_per_flag < 0.0 {
            return Err(invalid("scoring.security.penalty_per_flag", "must be >= 0"));
        }
        Ok(())
    }

    fn validate_lint(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (i, c) in self.lint.checkers.iter().enumerate() {
            let key = format!("lint.checkers[{i}]");
            if c.name.trim().is_empty() {
                return Err(invalid(format!("{key}.name"), "must not be empty"));
            }
            if !seen.insert(c.name.as_str()) {
                return Err(invalid(
                    format!("{key}.name"),
                    format!("duplicate checker name '{}'", c.name),
                ));
            }
            if c.preset.is_none() {
                if c.command.is_empty() {
                    return Err(invalid(
                        format!("{key}.command"),
                        "required when no preset is given",
                    ));
                }
                if c.extensions.is_empty() {
                    return Err(invalid(
                        format!("{key}.extensions"),
                        "required when no preset is given",
                    ));
                }
                if c.format.is_none() {
                    return Err(invalid(
                        format!("{key}.format"),
                        "required when no preset is given",
                    ));
                }
            }
            if let Some(OutputFormat::Regex { pattern }) = &c.format {
                let re = regex::Regex::new(pattern)
                    .map_err(|e| invalid(format!("{key}.format.pattern"), e.to_string()))?;
                let names: HashSet<&str> = re.capture_names().flatten().collect();
                for required in ["file", "message"] {
                    if !names.contains(required) {
                        return Err(invalid(
                            format!("{key}.format.pattern"),
                            format!("missing named group '{required}'"),
                        ));
                    }
                }
            }
            if c.time_ms == Some(0) {
                return Err(invalid(format!("{key}.time_ms"), "must be positive"));
            }
        }
        Ok(())
    }

    fn validate_suite(&self) -> Result<(), ConfigError> {
        let suite = &self.suite;
        if !suite.cases.is_empty() && suite.entry.is_empty() {
            return Err(invalid("suite.entry", "required when cases are configured"));
        }
        if let Some(build) = &suite.build {
            if build.is_empty() {
                return Err(invalid("suite.build", "must not be an empty command"));
            }
        }
        let mut names = HashSet::new();
        for (i, case) in suite.cases.iter().enumerate() {
            let key = format!("suite.cases[{i}]");
            if case.name.trim().is_empty() {
                return Err(invalid(format!("{key}.name"), "must not be empty"));
            }
            if !names.insert(case.name.as_str()) {
                return Err(invalid(
                    format!("{key}.name"),
                    format!("duplicate case name '{}'", case.name),
                ));
            }
            if case.weight == 0 {
                return Err(invalid(format!("{key}.weight"), "must be positive"));
            }
            if let Some(field) = self.limits_for(case).first_invalid() {
                return Err(invalid(format!("{key}.limits.{field}"), "must be positive"));
            }
            match &case.check {
                OutputCheck::Tokens { epsilon, .. } if !epsilon.is_finite() || *epsilon < 0.0 => {
                    return Err(invalid(format!("{key}.check.epsilon"), "must be >= 0"));
                }
                OutputCheck::Validator { command, .. } if command.is_empty() => {
                    return Err(invalid(format!("{key}.check.command"), "must not be empty"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
