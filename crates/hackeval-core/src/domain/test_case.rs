//! Test cases: hidden or sample correctness checks supplied by configuration.

use serde::{Deserialize, Serialize};

use crate::sandbox::LimitOverrides;

/// How a case's output is judged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputCheck {
    /// Text equality after normalizing line endings, trailing whitespace
    /// per line, and trailing blank lines.
    Exact { expected: String },

    /// Whitespace-separated token equality; numeric tokens compare within
    /// `epsilon` (absolute, or relative to the expected magnitude).
    Tokens { expected: String, epsilon: f64 },

    /// External validator run in the sandbox. Exit code 0 means pass.
    Validator {
        command: Vec<String>,
        #[serde(default)]
        expected: Option<String>,
    },
}

fn default_weight() -> u32 {
    1
}

/// One correctness check with expected behavior and resource limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    /// Case name, unique within a suite.
    pub name: String,

    /// Bytes written to the program's stdin.
    #[serde(default)]
    pub input: String,

    /// Output judgement.
    pub check: OutputCheck,

    /// Relative weight within the suite.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Per-case overrides of the default limits.
    #[serde(default)]
    pub limits: LimitOverrides,

    /// Extra arguments appended to the entry command.
    #[serde(default)]
    pub args: Vec<String>,
}

impl TestCase {
    /// Exact-match case with default weight and limits.
    pub fn exact(name: impl Into<String>, input: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            check: OutputCheck::Exact {
                expected: expected.into(),
            },
            weight: default_weight(),
            limits: LimitOverrides::default(),
            args: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_limits(mut self, limits: LimitOverrides) -> Self {
        self.limits = limits;
        self
    }
}
