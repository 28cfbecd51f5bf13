//! Linter output parsers.
//!
//! Each supported format is turned into [`ViolationRecord`]s with paths
//! relative to the workspace root. Line-oriented formats skip lines they do
//! not recognize (headers, summaries); JSON formats must parse whole.

use std::path::Path;
use std::sync::OnceLock;

use hackeval_core::{OutputFormat, Severity, ViolationRecord};
use regex::{Captures, Regex};
use serde::Deserialize;

/// Compile once; a pattern that fails to compile matches nothing.
fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn pylint_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"^(?P<file>[^:]+):(?P<line>\d+):(?P<col>\d+): (?P<rule>[A-Z]\d{4}) \((?P<severity>[a-z-]+)\) (?P<message>.*)$")
}

fn flake8_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"^(?P<file>[^:]+):(?P<line>\d+):(?P<col>\d+): (?P<rule>[A-Z]+\d+) (?P<message>.*)$")
}

fn unix_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"^(?P<file>[^:]+):(?P<line>\d+):(?P<col>\d+): (?P<message>.*?)\s*\[(?P<severity>[A-Za-z]+)(?:/(?P<rule>[^\]]+))?\]\s*$")
}

fn trailing_rule_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"\s*\((?P<rule>[\w@/.-]+)\)$")
}

fn checkstyle_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"^\[(?P<severity>[A-Z]+)\] (?P<file>.+?):(?P<line>\d+):(?:(?P<col>\d+):)? (?P<message>.*?)(?: \[(?P<rule>\w+)\])?\s*$")
}

/// Compiled parser for one [`OutputFormat`].
#[derive(Debug, Clone)]
pub enum OutputParser {
    Pylint,
    Flake8,
    Unix,
    Checkstyle,
    EslintJson,
    Regex(Regex),
}

impl OutputParser {
    pub fn new(format: &OutputFormat) -> Result<Self, regex::Error> {
        Ok(match format {
            OutputFormat::Pylint => OutputParser::Pylint,
            OutputFormat::Flake8 => OutputParser::Flake8,
            OutputFormat::Unix => OutputParser::Unix,
            OutputFormat::Checkstyle => OutputParser::Checkstyle,
            OutputFormat::EslintJson => OutputParser::EslintJson,
            OutputFormat::Regex { pattern } => OutputParser::Regex(Regex::new(pattern)?),
        })
    }

    /// Parse `output` from `checker` run inside `root`.
    pub fn parse(&self, checker: &str, output: &str, root: &Path) -> Result<Vec<ViolationRecord>, String> {
        match self {
            OutputParser::EslintJson => parse_eslint_json(checker, output, root),
            OutputParser::Regex(re) => Ok(parse_lines(output, |line| {
                regex_line(re, checker, line, root)
            })),
            OutputParser::Pylint => Ok(parse_lines(output, |line| pylint_line(checker, line, root))),
            OutputParser::Flake8 => Ok(parse_lines(output, |line| flake8_line(checker, line, root))),
            OutputParser::Unix => Ok(parse_lines(output, |line| unix_line(checker, line, root))),
            OutputParser::Checkstyle => {
                Ok(parse_lines(output, |line| checkstyle_line(checker, line, root)))
            }
        }
    }
}

fn parse_lines<F>(output: &str, mut parse: F) -> Vec<ViolationRecord>
where
    F: FnMut(&str) -> Option<ViolationRecord>,
{
    output
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter_map(&mut parse)
        .collect()
}

/// Workspace-relative form of a path a tool printed.
pub fn relativize(path: &str, root: &Path) -> String {
    let trimmed = path.trim();
    let as_path = Path::new(trimmed);
    if as_path.is_absolute() {
        if let Ok(rel) = as_path.strip_prefix(root) {
            return rel.to_string_lossy().into_owned();
        }
        if let Ok(canonical) = root.canonicalize() {
            if let Ok(rel) = as_path.strip_prefix(&canonical) {
                return rel.to_string_lossy().into_owned();
            }
        }
    }
    let mut rel = trimmed;
    while let Some(rest) = rel.strip_prefix("./") {
        rel = rest;
    }
    rel.to_string()
}

fn number(caps: &Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}

fn located(record: ViolationRecord, line: Option<u32>, col: Option<u32>) -> ViolationRecord {
    match line {
        Some(line) => record.at(line, col),
        None => record,
    }
}

fn pylint_line(checker: &str, line: &str, root: &Path) -> Option<ViolationRecord> {
    let caps = pylint_re()?.captures(line)?;
    let severity = Severity::from_tool_label(&caps["severity"]).unwrap_or(Severity::Warning);
    let record = ViolationRecord::new(
        checker,
        &caps["rule"],
        severity,
        relativize(&caps["file"], root),
        caps["message"].trim(),
    );
    // pylint columns are 0-based
    Some(located(
        record,
        number(&caps, "line"),
        number(&caps, "col").map(|c| c + 1),
    ))
}

/// F (pyflakes) and E (pycodestyle errors) are errors, the rest warnings.
fn flake8_severity(code: &str) -> Severity {
    match code.chars().next() {
        Some('E') | Some('F') => Severity::Error,
        _ => Severity::Warning,
    }
}

fn flake8_line(checker: &str, line: &str, root: &Path) -> Option<ViolationRecord> {
    let caps = flake8_re()?.captures(line)?;
    let record = ViolationRecord::new(
        checker,
        &caps["rule"],
        flake8_severity(&caps["rule"]),
        relativize(&caps["file"], root),
        caps["message"].trim(),
    );
    Some(located(record, number(&caps, "line"), number(&caps, "col")))
}

fn unix_line(checker: &str, line: &str, root: &Path) -> Option<ViolationRecord> {
    let caps = unix_re()?.captures(line)?;
    let severity = Severity::from_tool_label(&caps["severity"]).unwrap_or(Severity::Warning);
    let mut message = caps["message"].to_string();
    let rule = match caps.name("rule") {
        Some(rule) => rule.as_str().to_string(),
        // stylelint puts the rule in parentheses at the end of the text
        None => {
            let found = trailing_rule_re()
                .and_then(|re| re.captures(&message))
                .map(|c| (c["rule"].to_string(), c.get(0).map_or(0, |m| m.start())));
            match found {
                Some((rule, cut)) => {
                    message.truncate(cut);
                    rule
                }
                None => checker.to_string(),
            }
        }
    };
    let record = ViolationRecord::new(
        checker,
        rule,
        severity,
        relativize(&caps["file"], root),
        message.trim(),
    );
    Some(located(record, number(&caps, "line"), number(&caps, "col")))
}

fn checkstyle_line(checker: &str, line: &str, root: &Path) -> Option<ViolationRecord> {
    let caps = checkstyle_re()?.captures(line)?;
    let label = &caps["severity"];
    if label == "IGNORE" {
        return None;
    }
    let severity = Severity::from_tool_label(label).unwrap_or(Severity::Warning);
    let rule = caps
        .name("rule")
        .map_or_else(|| checker.to_string(), |m| m.as_str().to_string());
    let record = ViolationRecord::new(
        checker,
        rule,
        severity,
        relativize(&caps["file"], root),
        caps["message"].trim(),
    );
    Some(located(record, number(&caps, "line"), number(&caps, "col")))
}

fn regex_line(re: &Regex, checker: &str, line: &str, root: &Path) -> Option<ViolationRecord> {
    let caps = re.captures(line)?;
    let file = caps.name("file")?.as_str();
    let message = caps.name("message")?.as_str();
    let severity = caps
        .name("severity")
        .and_then(|m| Severity::from_tool_label(m.as_str()))
        .unwrap_or(Severity::Warning);
    let rule = caps
        .name("rule")
        .map_or_else(|| checker.to_string(), |m| m.as_str().to_string());
    let record = ViolationRecord::new(checker, rule, severity, relativize(file, root), message.trim());
    Some(located(record, number(&caps, "line"), number(&caps, "col")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintFile {
    file_path: String,
    #[serde(default)]
    messages: Vec<EslintMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintMessage {
    rule_id: Option<String>,
    severity: u8,
    message: String,
    line: Option<u32>,
    column: Option<u32>,
    #[serde(default)]
    fatal: bool,
}

fn parse_eslint_json(checker: &str, output: &str, root: &Path) -> Result<Vec<ViolationRecord>, String> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let files: Vec<EslintFile> = serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    for file in files {
        let path = relativize(&file.file_path, root);
        for msg in file.messages {
            let severity = match msg.severity {
                2 => Severity::Error,
                1 => Severity::Warning,
                _ => Severity::Hint,
            };
            let rule = match (msg.rule_id, msg.fatal) {
                (Some(rule), _) => rule,
                (None, true) => "parse-error".to_string(),
                (None, false) => checker.to_string(),
            };
            let record = ViolationRecord::new(checker, rule, severity, path.clone(), msg.message.trim());
            out.push(located(record, msg.line, msg.column));
        }
    }
    Ok(out)
}
