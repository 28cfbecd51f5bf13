//! Static analyzer: runs every configured checker over a workspace and
//! merges their findings into one [`AnalysisReport`].
//!
//! Checkers run concurrently, each in its own scratch directory. A checker
//! that crashes, times out, or is not installed yields a diagnostic instead
//! of violations; the rest of the report is unaffected. Only sandbox
//! infrastructure failures and cancellation abort the analysis.

pub mod checker;
pub mod lint_configs;
pub mod parse;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use hackeval_core::{
    emit_checker_failed, AnalysisReport, CancelSignal, EngineConfig,
    FileRating, FileReport, LanguageSummary, ResourceLimits, SandboxError, SandboxRequest,
    SandboxRunner, Severity, ViolationRecord, Workspace, METRICS,
};

pub use checker::{Checker, CheckerContext, CheckerError, CommandChecker, ExitPolicy};
use checker::aborts_analysis;
pub use lint_configs::write_default_configs;
pub use parse::OutputParser;

const CONFIG_SCRATCH: &str = "lint-config";
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules"];

/// Errors that abort an analysis.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis infrastructure failure: {0}")]
    Infrastructure(SandboxError),

    #[error("analysis cancelled")]
    Cancelled,

    #[error("analysis workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("invalid checker configuration: {0}")]
    Config(String),
}

impl From<SandboxError> for AnalysisError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Cancelled => AnalysisError::Cancelled,
            other => AnalysisError::Infrastructure(other),
        }
    }
}

/// Post-parse rule adjustments for one checker.
#[derive(Debug, Clone, Default)]
pub struct RuleAdjustments {
    pub severity_overrides: BTreeMap<String, Severity>,
    pub disabled: HashSet<String>,
}

impl RuleAdjustments {
    fn apply(&self, violations: Vec<ViolationRecord>) -> Vec<ViolationRecord> {
        violations
            .into_iter()
            .filter(|v| !self.disabled.contains(&v.rule))
            .map(|mut v| {
                if let Some(severity) = self.severity_overrides.get(&v.rule) {
                    v.severity = *severity;
                }
                v
            })
            .collect()
    }
}

struct Registered {
    checker: Arc<dyn Checker>,
    adjustments: RuleAdjustments,
}

/// Runs a fixed set of checkers.
pub struct StaticAnalyzer {
    checkers: Vec<Registered>,
    max_violations: usize,
}

impl StaticAnalyzer {
    pub fn new(max_violations_per_checker: usize) -> Self {
        Self {
            checkers: Vec::new(),
            max_violations: max_violations_per_checker,
        }
    }

    pub fn with_checker(self, checker: Arc<dyn Checker>) -> Self {
        self.with_adjusted_checker(checker, RuleAdjustments::default())
    }

    pub fn with_adjusted_checker(mut self, checker: Arc<dyn Checker>, adjustments: RuleAdjustments) -> Self {
        self.checkers.push(Registered { checker, adjustments });
        self
    }

    /// Build every checker in `[lint]`.
    pub fn from_config(config: &EngineConfig) -> Result<Self, AnalysisError> {
        let mut analyzer = Self::new(config.lint.max_violations_per_checker);
        for spec in &config.lint.checkers {
            let checker = CommandChecker::from_spec(spec, config)
                .map_err(|e| AnalysisError::Config(e.to_string()))?;
            let adjustments = RuleAdjustments {
                severity_overrides: spec.severity_overrides.clone(),
                disabled: spec.disabled_rules.iter().cloned().collect(),
            };
            analyzer = analyzer.with_adjusted_checker(Arc::new(checker), adjustments);
        }
        Ok(analyzer)
    }

    pub fn checker_names(&self) -> Vec<&str> {
        self.checkers.iter().map(|r| r.checker.name()).collect()
    }

    /// Analyze the workspace.
    pub async fn analyze(
        &self,
        workspace: &Workspace,
        sandbox: &dyn SandboxRunner,
        cancel: &CancelSignal,
    ) -> Result<AnalysisReport, AnalysisError> {
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let root = workspace.root();
        let files = collect_files(&root)?;
        let config_dir = workspace.scratch_dir(CONFIG_SCRATCH)?;
        write_default_configs(&config_dir)?;

        let mut planned = Vec::new();
        for reg in &self.checkers {
            let accepted: Vec<String> = files
                .iter()
                .filter(|f| reg.checker.accepts(f))
                .cloned()
                .collect();
            if accepted.is_empty() {
                tracing::debug!(checker = reg.checker.name(), "no matching files, skipping");
                continue;
            }
            let scratch = workspace.scratch_dir(&format!("lint-{}", reg.checker.name()))?;
            planned.push((reg, accepted, scratch));
        }

        let root = root.as_path();
        let config_dir = config_dir.as_path();
        let runs = planned.iter().map(|(reg, accepted, scratch)| async move {
            let ctx = CheckerContext {
                sandbox,
                workspace_root: root,
                config_dir,
                scratch_dir: scratch,
                files: accepted,
                cancel,
            };
            let started = std::time::Instant::now();
            let result = reg.checker.run(&ctx).await;
            tracing::debug!(
                checker = reg.checker.name(),
                files = accepted.len(),
                duration_ms = started.elapsed().as_millis() as u64,
                ok = result.is_ok(),
                "checker finished"
            );
            result
        });
        let results = join_all(runs).await;

        let mut violations = Vec::new();
        let mut diagnostics = Vec::new();
        for ((reg, _, _), result) in planned.iter().zip(results) {
            let name = reg.checker.name();
            match result {
                Ok(found) => {
                    let mut found = reg.adjustments.apply(found);
                    found.sort_by(|a, b| a.report_order(b));
                    if found.len() > self.max_violations {
                        tracing::info!(
                            checker = name,
                            reported = found.len(),
                            kept = self.max_violations,
                            "truncating checker violations"
                        );
                        found.truncate(self.max_violations);
                    }
                    violations.extend(found);
                }
                Err(CheckerError::Sandbox(e)) if aborts_analysis(&e) => return Err(e.into()),
                Err(e) => {
                    METRICS.inc_checker_failures();
                    emit_checker_failed(name, &e);
                    diagnostics.push(e.diagnostic(name));
                }
            }
        }

        violations.sort_by(|a, b| a.report_order(b));
        diagnostics.sort_by(|a, b| a.checker.cmp(&b.checker));

        let (file_reports, languages) = self.summarize(&files, &violations);
        Ok(AnalysisReport {
            violations,
            diagnostics,
            files: file_reports,
            languages,
        })
    }

    fn language_of(&self, file: &str) -> Option<&str> {
        self.checkers
            .iter()
            .find(|r| r.checker.accepts(file))
            .map(|r| r.checker.language())
    }

    /// Per-file ratings for every analysed file, plus per-language totals.
    /// Hints are reported as violations but do not count here.
    fn summarize(
        &self,
        files: &[String],
        violations: &[ViolationRecord],
    ) -> (Vec<FileReport>, Vec<LanguageSummary>) {
        let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for v in violations {
            let entry = counts.entry(v.file.as_str()).or_default();
            match v.severity {
                Severity::Error => entry.0 += 1,
                Severity::Warning => entry.1 += 1,
                Severity::Hint => {}
            }
        }

        let mut reports = Vec::new();
        let mut languages: BTreeMap<String, LanguageSummary> = BTreeMap::new();
        for file in files {
            let Some(language) = self.language_of(file) else {
                continue;
            };
            let (errors, warnings) = counts.get(file.as_str()).copied().unwrap_or_default();
            reports.push(FileReport {
                file: file.clone(),
                language: language.to_string(),
                errors,
                warnings,
                rating: FileRating::from_counts(errors, warnings),
            });
            let summary = languages
                .entry(language.to_string())
                .or_insert_with(|| LanguageSummary {
                    language: language.to_string(),
                    files: 0,
                    errors: 0,
                    warnings: 0,
                });
            summary.files += 1;
            summary.errors += errors;
            summary.warnings += warnings;
        }
        reports.sort_by(|a, b| a.file.cmp(&b.file));
        (reports, languages.into_values().collect())
    }
}

/// Workspace-relative paths of every regular file worth analysing, sorted.
///
/// Symlinks are never followed; VCS metadata, dependency folders, minified
/// bundles and linter configuration files are skipped.
pub fn collect_files(root: &Path) -> std::io::Result<Vec<String>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                let name = entry.file_name();
                if SKIPPED_DIRS.iter().any(|s| name.as_os_str() == *s) {
                    continue;
                }
                walk(root, &path, out)?;
            } else if file_type.is_file() {
                let Ok(rel) = path.strip_prefix(root) else {
                    continue;
                };
                let rel = rel.to_string_lossy().replace('\\', "/");
                if !lint_configs::is_ignored(&rel) {
                    out.push(rel);
                }
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    walk(root, root, &mut out)?;
    out.sort();
    Ok(out)
}

/// Whether `tool --version` runs successfully in the sandbox.
pub async fn check_tool_availability(
    sandbox: &dyn SandboxRunner,
    tool: &str,
    cancel: &CancelSignal,
) -> bool {
    let Ok(dir) = tempfile::tempdir() else {
        return false;
    };
    let request = SandboxRequest::new(vec![tool.to_string(), "--version".to_string()], dir.path());
    let limits = ResourceLimits {
        time_ms: 10_000,
        ..ResourceLimits::default()
    };
    match sandbox.run(request, &limits, cancel).await {
        Ok(outcome) => outcome.succeeded(),
        Err(e) => {
            tracing::debug!(tool = tool, error = %e, "tool unavailable");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, "x").expect("write");
    }

    #[test]
    fn test_collect_files_skips_noise() {
        let dir = tempfile::tempdir().expect("tempdir");
        for rel in [
            "main.py",
            "web/app.js",
            "web/vendor.min.js",
            "web/eslint.config.js",
            ".git/config",
            "node_modules/left-pad/index.js",
            "pkg/util.py",
        ] {
            touch(dir.path(), rel);
        }
        let files = collect_files(dir.path()).expect("walk");
        assert_eq!(files, vec!["main.py", "pkg/util.py", "web/app.js"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_collect_files_ignores_symlinks() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "real.py");
        std::os::unix::fs::symlink("/etc/passwd", dir.path().join("link.py")).expect("symlink");
        let files = collect_files(dir.path()).expect("walk");
        assert_eq!(files, vec!["real.py"]);
    }

    #[test]
    fn test_rule_adjustments() {
        let mut adjustments = RuleAdjustments::default();
        adjustments.disabled.insert("E501".to_string());
        adjustments
            .severity_overrides
            .insert("W0611".to_string(), Severity::Error);
        let input = vec![
            ViolationRecord::new("pylint", "E501", Severity::Error, "a.py", "long"),
            ViolationRecord::new("pylint", "W0611", Severity::Warning, "a.py", "unused import"),
        ];
        let out = adjustments.apply(input);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rule, "W0611");
        assert_eq!(out[0].severity, Severity::Error);
    }

    #[test]
    fn test_from_config_rejects_bad_checker() {
        let mut config = EngineConfig::default();
        config.lint.checkers.push(hackeval_core::CheckerSpec {
            name: "broken".to_string(),
            command: vec!["tool".to_string()],
            format: Some(hackeval_core::OutputFormat::Regex {
                pattern: "(unclosed".to_string(),
            }),
            ..Default::default()
        });
        assert!(matches!(
            StaticAnalyzer::from_config(&config),
            Err(AnalysisError::Config(_))
        ));
    }
}
