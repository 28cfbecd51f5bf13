//! hackeval-judge: evaluation of fetched submissions
//!
//! Provides:
//! - Static analysis through pluggable linters run in the sandbox
//! - A test harness comparing program output against expected results
//! - Deterministic scoring of both into a composite result
//! - The job engine that queues, orchestrates, cancels and persists evaluations

pub mod analyzer;
pub mod engine;
pub mod harness;
pub mod scorer;

// Re-export key types
pub use analyzer::{
    check_tool_availability, collect_files, AnalysisError, Checker, CheckerContext, CheckerError,
    CommandChecker, StaticAnalyzer,
};
pub use engine::{CancelOutcome, Engine, EngineError, JobEvent, ResultLookup};
pub use harness::{HarnessError, SuiteOutcome, TestHarness};
pub use scorer::Scorer;
