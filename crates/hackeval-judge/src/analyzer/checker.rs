//! Checkers: pluggable static-analysis tools behind one interface.
//!
//! Every checker receives the files it accepts and returns normalized
//! [`ViolationRecord`]s, so the analyzer and the scorer never special-case a
//! tool. [`CommandChecker`] covers the built-in catalog and custom commands;
//! it always runs through the sandbox.

use std::path::Path;

use async_trait::async_trait;
use hackeval_core::{
    CancelSignal, CheckerDiagnostic, CheckerPreset, CheckerSpec, EngineConfig, FailureCategory,
    LimitKind, OutputFormat, ResourceLimits, SandboxError, SandboxRequest, SandboxRunner,
    Termination, ViolationRecord,
};

use super::lint_configs::{
    CHECKSTYLE_CONFIG, ESLINT_CONFIG, FLAKE8_CFG, HTMLHINT_CONFIG, PYLINTRC, STYLELINT_CONFIG,
};
use super::parse::OutputParser;

/// Placeholder replaced by the per-job linter config directory.
pub const CONFIG_DIR_VAR: &str = "$CONFIG_DIR";
/// Argument replaced by the list of matched files.
pub const FILES_VAR: &str = "$FILES";

/// Stderr kept in a crash diagnostic.
const STDERR_TAIL_CHARS: usize = 300;

/// Why a checker contributed nothing.
#[derive(Debug, thiserror::Error)]
pub enum CheckerError {
    #[error("tool not available: {0}")]
    Unavailable(String),

    #[error("checker exceeded its {0} limit")]
    LimitExceeded(LimitKind),

    #[error("checker crashed: {0}")]
    Crashed(String),

    #[error("unparseable checker output: {0}")]
    Unparseable(String),

    #[error("invalid checker definition: {0}")]
    Misconfigured(String),

    #[error(transparent)]
    Sandbox(SandboxError),
}

impl From<SandboxError> for CheckerError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::CommandNotFound(program) => CheckerError::Unavailable(program),
            other => CheckerError::Sandbox(other),
        }
    }
}

impl CheckerError {
    /// Infrastructure failures and cancellation abort the whole analysis;
    /// everything else only degrades this checker.
    pub fn is_fatal(&self) -> bool {
        match self {
            CheckerError::Sandbox(e) => aborts_analysis(e),
            _ => false,
        }
    }

    pub fn diagnostic(&self, checker: &str) -> CheckerDiagnostic {
        match self {
            CheckerError::Unavailable(_) => CheckerDiagnostic::unavailable(checker, self.to_string()),
            _ => CheckerDiagnostic::failed(checker, self.to_string()),
        }
    }
}

pub(crate) fn aborts_analysis(err: &SandboxError) -> bool {
    matches!(
        err.category(),
        FailureCategory::Infrastructure | FailureCategory::Cancelled
    )
}

/// What one checker invocation gets to work with.
pub struct CheckerContext<'a> {
    pub sandbox: &'a dyn SandboxRunner,
    /// Source tree; the tool's working directory.
    pub workspace_root: &'a Path,
    /// Default linter configurations.
    pub config_dir: &'a Path,
    /// The only directory the tool may write to.
    pub scratch_dir: &'a Path,
    /// Workspace-relative files this checker accepted, sorted.
    pub files: &'a [String],
    pub cancel: &'a CancelSignal,
}

/// A static-analysis tool.
#[async_trait]
pub trait Checker: Send + Sync {
    fn name(&self) -> &str;

    /// Language reported in per-file summaries.
    fn language(&self) -> &str;

    /// Whether the workspace-relative `path` is input for this checker.
    fn accepts(&self, path: &str) -> bool;

    async fn run(&self, ctx: &CheckerContext<'_>) -> Result<Vec<ViolationRecord>, CheckerError>;
}

/// Exit codes that still mean "the tool ran and reported findings".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// 0 clean, 1 findings.
    ZeroOrOne,
    /// 0 clean, 2 findings (stylelint).
    ZeroOrTwo,
    /// Pylint's bit mask; bit 32 is a usage error.
    PylintMask,
    /// Any exit code (checkstyle exits with the error count).
    AnyCode,
}

impl ExitPolicy {
    pub fn accepts(self, code: i32) -> bool {
        match self {
            ExitPolicy::ZeroOrOne => code == 0 || code == 1,
            ExitPolicy::ZeroOrTwo => code == 0 || code == 2,
            ExitPolicy::PylintMask => (0..32).contains(&code),
            ExitPolicy::AnyCode => code >= 0,
        }
    }
}

/// Built-in tool definition.
struct PresetDef {
    command: Vec<String>,
    extensions: &'static [&'static str],
    language: &'static str,
    format: OutputFormat,
    exit: ExitPolicy,
}

fn config_arg(prefix: &str, file: &str) -> String {
    format!("{prefix}{CONFIG_DIR_VAR}/{file}")
}

fn preset_def(preset: CheckerPreset) -> PresetDef {
    let args = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    match preset {
        CheckerPreset::Pylint => PresetDef {
            command: vec![
                "pylint".to_string(),
                "--output-format=text".to_string(),
                "--msg-template={path}:{line}:{column}: {msg_id} ({category}) {msg}".to_string(),
                config_arg("--rcfile=", PYLINTRC),
                FILES_VAR.to_string(),
            ],
            extensions: &["py"],
            language: "python",
            format: OutputFormat::Pylint,
            exit: ExitPolicy::PylintMask,
        },
        CheckerPreset::Flake8 => PresetDef {
            command: vec![
                "flake8".to_string(),
                config_arg("--config=", FLAKE8_CFG),
                FILES_VAR.to_string(),
            ],
            extensions: &["py"],
            language: "python",
            format: OutputFormat::Flake8,
            exit: ExitPolicy::ZeroOrOne,
        },
        CheckerPreset::Eslint => PresetDef {
            command: {
                let mut c = args(&["eslint", "--format", "json", "--config"]);
                c.push(config_arg("", ESLINT_CONFIG));
                c.push(FILES_VAR.to_string());
                c
            },
            extensions: &["js", "mjs", "cjs", "jsx"],
            language: "javascript",
            format: OutputFormat::EslintJson,
            exit: ExitPolicy::ZeroOrOne,
        },
        CheckerPreset::Htmlhint => PresetDef {
            command: {
                let mut c = args(&["htmlhint", "--format", "unix", "--config"]);
                c.push(config_arg("", HTMLHINT_CONFIG));
                c.push(FILES_VAR.to_string());
                c
            },
            extensions: &["html", "htm"],
            language: "html",
            format: OutputFormat::Unix,
            exit: ExitPolicy::ZeroOrOne,
        },
        CheckerPreset::Stylelint => PresetDef {
            command: {
                let mut c = args(&["stylelint", "--formatter", "unix", "--config"]);
                c.push(config_arg("", STYLELINT_CONFIG));
                c.push(FILES_VAR.to_string());
                c
            },
            extensions: &["css"],
            language: "css",
            format: OutputFormat::Unix,
            exit: ExitPolicy::ZeroOrTwo,
        },
        CheckerPreset::Checkstyle => PresetDef {
            command: {
                let mut c = args(&["checkstyle", "-c"]);
                c.push(config_arg("", CHECKSTYLE_CONFIG));
                c.push(FILES_VAR.to_string());
                c
            },
            extensions: &["java"],
            language: "java",
            format: OutputFormat::Checkstyle,
            exit: ExitPolicy::AnyCode,
        },
    }
}

/// A checker that runs an external command in the sandbox.
#[derive(Debug, Clone)]
pub struct CommandChecker {
    name: String,
    language: String,
    command: Vec<String>,
    extensions: Vec<String>,
    parser: OutputParser,
    exit: ExitPolicy,
    limits: ResourceLimits,
}

impl CommandChecker {
    /// Build from a configured spec; unset fields come from the preset.
    pub fn from_spec(spec: &CheckerSpec, config: &EngineConfig) -> Result<Self, CheckerError> {
        let preset = spec.preset.map(preset_def);

        let command = if spec.command.is_empty() {
            preset.as_ref().map(|p| p.command.clone()).unwrap_or_default()
        } else {
            spec.command.clone()
        };
        if command.is_empty() {
            return Err(CheckerError::Misconfigured(format!("{}: no command", spec.name)));
        }

        let extensions = if spec.extensions.is_empty() {
            preset
                .as_ref()
                .map(|p| p.extensions.iter().map(|e| e.to_string()).collect())
                .unwrap_or_default()
        } else {
            spec.extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect()
        };

        let format = match (&spec.format, &preset) {
            (Some(format), _) => format.clone(),
            (None, Some(p)) => p.format.clone(),
            (None, None) => {
                return Err(CheckerError::Misconfigured(format!("{}: no output format", spec.name)))
            }
        };
        let parser = OutputParser::new(&format)
            .map_err(|e| CheckerError::Misconfigured(format!("{}: {e}", spec.name)))?;

        let language = spec
            .language
            .clone()
            .or_else(|| preset.as_ref().map(|p| p.language.to_string()))
            .unwrap_or_else(|| "other".to_string());

        Ok(Self {
            name: spec.name.clone(),
            language,
            command,
            extensions,
            parser,
            exit: preset.map_or(ExitPolicy::ZeroOrOne, |p| p.exit),
            limits: config.checker_limits(spec),
        })
    }

    /// The executable this checker invokes.
    pub fn program(&self) -> &str {
        self.command.first().map_or("", String::as_str)
    }

    fn expand(&self, config_dir: &Path, files: &[String]) -> Vec<String> {
        let dir = config_dir.to_string_lossy();
        let mut out = Vec::with_capacity(self.command.len() + files.len());
        for arg in &self.command {
            if arg == FILES_VAR {
                out.extend(files.iter().cloned());
            } else {
                out.push(arg.replace(CONFIG_DIR_VAR, &dir));
            }
        }
        out
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    trimmed.chars().skip(count.saturating_sub(max_chars)).collect()
}

#[async_trait]
impl Checker for CommandChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn language(&self) -> &str {
        &self.language
    }

    fn accepts(&self, path: &str) -> bool {
        let Some((_, ext)) = path.rsplit_once('.') else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|e| *e == ext)
    }

    async fn run(&self, ctx: &CheckerContext<'_>) -> Result<Vec<ViolationRecord>, CheckerError> {
        let request = SandboxRequest::new(self.expand(ctx.config_dir, ctx.files), ctx.workspace_root)
            .with_writable_dir(ctx.scratch_dir);
        let outcome = ctx.sandbox.run(request, &self.limits, ctx.cancel).await?;

        if let Some(kind) = outcome.limit_exceeded() {
            return Err(CheckerError::LimitExceeded(kind));
        }
        match outcome.termination {
            Termination::Exited { code } if self.exit.accepts(code) => {}
            Termination::Exited { code } => {
                return Err(CheckerError::Crashed(format!(
                    "exit code {code}: {}",
                    tail(&outcome.stderr, STDERR_TAIL_CHARS)
                )))
            }
            Termination::Signaled { signal } => {
                return Err(CheckerError::Crashed(format!("killed by signal {signal}")))
            }
            Termination::Killed { .. } => return Err(CheckerError::Sandbox(SandboxError::Cancelled)),
        }

        self.parser
            .parse(&self.name, &outcome.stdout, ctx.workspace_root)
            .map_err(CheckerError::Unparseable)
    }
}
