//! Normalized static-analysis records.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Severity level for a violation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Hint,
    Warning,
    Error,
}

impl Severity {
    /// Parse the severity words and one-letter codes linters print.
    ///
    /// Pylint categories map as: fatal/error to `Error`, warning to
    /// `Warning`, convention/refactor/info to `Hint`.
    pub fn from_tool_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "error" | "err" | "e" | "fatal" | "f" => Some(Severity::Error),
            "warning" | "warn" | "w" => Some(Severity::Warning),
            "hint" | "info" | "i" | "note" | "convention" | "c" | "refactor" | "r" => {
                Some(Severity::Hint)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Hint => write!(f, "hint"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single rule breach, normalized across checkers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViolationRecord {
    /// Rule identifier (e.g. "C0103", "E501", "camelcase").
    pub rule: String,

    /// Severity after ruleset overrides.
    pub severity: Severity,

    /// File path relative to the workspace root.
    pub file: String,

    /// Line number (1-indexed).
    pub line: Option<u32>,

    /// Column number (1-indexed).
    pub column: Option<u32>,

    /// Human-readable message.
    pub message: String,

    /// Checker that reported it.
    pub checker: String,
}

impl ViolationRecord {
    pub fn new(
        checker: impl Into<String>,
        rule: impl Into<String>,
        severity: Severity,
        file: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule: rule.into(),
            severity,
            file: file.into(),
            line: None,
            column: None,
            message: message.into(),
            checker: checker.into(),
        }
    }

    /// Set line and optional column.
    pub fn at(mut self, line: u32, column: Option<u32>) -> Self {
        self.line = Some(line);
        self.column = column;
        self
    }

    /// Deterministic report ordering: file, line, column, rule, checker, message.
    pub fn report_order(&self, other: &Self) -> Ordering {
        self.file
            .cmp(&other.file)
            .then(self.line.cmp(&other.line))
            .then(self.column.cmp(&other.column))
            .then(self.rule.cmp(&other.rule))
            .then(self.checker.cmp(&other.checker))
            .then(self.message.cmp(&other.message))
    }
}

/// Why a checker contributed nothing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckerDiagnosticKind {
    /// The tool crashed, timed out, or produced unparseable output.
    CheckerFailed,
    /// The tool is not installed on the host.
    ToolUnavailable,
}

/// A non-fatal analysis diagnostic, recorded alongside violations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckerDiagnostic {
    pub checker: String,
    pub kind: CheckerDiagnosticKind,
    pub message: String,
}

impl CheckerDiagnostic {
    pub fn failed(checker: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            checker: checker.into(),
            kind: CheckerDiagnosticKind::CheckerFailed,
            message: message.into(),
        }
    }

    pub fn unavailable(checker: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            checker: checker.into(),
            kind: CheckerDiagnosticKind::ToolUnavailable,
            message: message.into(),
        }
    }
}

/// Coarse per-file quality rating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileRating {
    Good,
    NeedsImprovement,
    Poor,
}

impl FileRating {
    /// `Good` with no findings, `Poor` above five errors.
    pub fn from_counts(errors: usize, warnings: usize) -> Self {
        if errors == 0 && warnings == 0 {
            FileRating::Good
        } else if errors > 5 {
            FileRating::Poor
        } else {
            FileRating::NeedsImprovement
        }
    }
}

/// Per-file analysis summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileReport {
    pub file: String,
    pub language: String,
    pub errors: usize,
    pub warnings: usize,
    pub rating: FileRating,
}

/// Per-language analysis summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LanguageSummary {
    pub language: String,
    pub files: usize,
    pub errors: usize,
    pub warnings: usize,
}
