//! Plain-text rendering for terminal output.

use std::collections::BTreeSet;
use std::fmt::Write;

use hackeval_core::{EngineConfig, EvaluationResult, OutputCheck};
use hackeval_judge::CommandChecker;
use serde::Serialize;

/// Availability of one external program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolStatus {
    pub tool: String,
    pub available: bool,
}

/// Programs the configuration needs on the host: checker tools, the build
/// and entry commands, and validators. Workspace-relative commands are the
/// submission's own and are skipped.
pub fn required_tools(config: &EngineConfig) -> Vec<String> {
    let mut tools = BTreeSet::new();
    for spec in &config.lint.checkers {
        if let Ok(checker) = CommandChecker::from_spec(spec, config) {
            tools.insert(checker.program().to_string());
        }
    }
    let suite = &config.suite;
    let commands = suite
        .build
        .iter()
        .chain(std::iter::once(&suite.entry))
        .chain(suite.cases.iter().filter_map(|c| match &c.check {
            OutputCheck::Validator { command, .. } => Some(command),
            _ => None,
        }));
    for command in commands {
        if let Some(program) = command.first() {
            tools.insert(program.clone());
        }
    }
    tools
        .into_iter()
        .filter(|t| !t.is_empty() && !t.starts_with("./"))
        .collect()
}

pub fn render_tools(statuses: &[ToolStatus]) -> String {
    let width = statuses.iter().map(|s| s.tool.len()).max().unwrap_or(0);
    let mut out = String::new();
    for s in statuses {
        let mark = if s.available { "ok" } else { "MISSING" };
        let _ = writeln!(out, "  {:<width$}  {}", s.tool, mark, width = width);
    }
    out
}

pub fn render_result(result: &EvaluationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "job        {}", result.job_id);
    let _ = writeln!(out, "participant {}", result.participant);
    if let Some(commit) = &result.commit {
        let _ = writeln!(out, "commit     {commit}");
    }
    match &result.failure {
        Some(reason) => {
            let _ = writeln!(out, "status     FAILED ({}: {})", reason.category, reason.code);
            let _ = writeln!(out, "           {}", reason.message);
        }
        None => {
            let _ = writeln!(out, "status     completed");
        }
    }
    let _ = writeln!(
        out,
        "score      {:.2} / {:.2}",
        result.composite_score, result.max_score
    );
    if result.failure.is_some() {
        return out;
    }

    let s = &result.sub_scores;
    let _ = writeln!(
        out,
        "           correctness {:.2}  performance {:.2}  quality {:.2}",
        s.correctness, s.performance, s.quality
    );
    if !result.security.flags.is_empty() {
        let _ = writeln!(
            out,
            "security   {} flag(s), penalty {:.2}{}",
            result.security.flags.len(),
            result.security.penalty,
            if result.security.disqualified { ", DISQUALIFIED" } else { "" }
        );
    }

    let _ = writeln!(out, "\ncases:");
    for e in &result.executions {
        let status = serde_json::to_value(e.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let _ = write!(out, "  [{:>2}] {:<24} {:<14} {:>6} ms", e.case_index, e.case_name, status, e.wall_time_ms);
        if let Some(detail) = &e.detail {
            let _ = write!(out, "  {detail}");
        }
        out.push('\n');
    }

    let a = &result.analysis;
    let _ = writeln!(out, "\nanalysis: {} violation(s)", a.violations.len());
    for lang in &a.languages {
        let _ = writeln!(
            out,
            "  {:<12} {} file(s), {} error(s), {} warning(s)",
            lang.language, lang.files, lang.errors, lang.warnings
        );
    }
    for d in &a.diagnostics {
        let _ = writeln!(out, "  ! {}: {}", d.checker, d.message);
    }
    for d in &result.submission_diagnostics {
        let _ = writeln!(out, "  ! {d}");
    }
    out
}
