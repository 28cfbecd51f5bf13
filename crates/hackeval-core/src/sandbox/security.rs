//! Detection of boundary-crossing attempts in sandboxed output.
//!
//! Landlock and the network policy block unauthorized access; the blocked
//! call surfaces as an error message on stderr. The scanner turns those
//! messages into [`SecurityFlag`]s for the scorer.

use regex::Regex;

use crate::config::SecurityPattern;
use crate::domain::{SecurityFlag, SecurityFlagKind};

use super::error::{SandboxError, SandboxResult};

/// Evidence lines are clipped to this many characters.
const MAX_EVIDENCE_CHARS: usize = 200;

/// Compiled set of security patterns.
#[derive(Debug, Clone)]
pub struct SecurityScanner {
    patterns: Vec<(SecurityFlagKind, Regex)>,
}

impl SecurityScanner {
    pub fn new(patterns: &[SecurityPattern]) -> SandboxResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&p.pattern)
                    .map(|re| (p.kind, re))
                    .map_err(|e| SandboxError::InvalidRequest(format!("security pattern: {e}")))
            })
            .collect::<SandboxResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// A scanner that never flags anything.
    pub fn disabled() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// At most one flag per kind, from the first matching line.
    pub fn scan(&self, stderr: &str) -> Vec<SecurityFlag> {
        let mut flags: Vec<SecurityFlag> = Vec::new();
        for line in stderr.lines() {
            for (kind, re) in &self.patterns {
                if flags.iter().any(|f| f.kind == *kind) {
                    continue;
                }
                if re.is_match(line) {
                    flags.push(SecurityFlag {
                        kind: *kind,
                        evidence: line.trim().chars().take(MAX_EVIDENCE_CHARS).collect(),
                    });
                }
            }
        }
        flags.sort_by(|a, b| a.kind.cmp(&b.kind));
        flags
    }
}
