//! Evaluation jobs and their lifecycle state machine.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{FailureReason, HackevalError};

/// Identifier of one evaluation attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = HackevalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(JobId)
            .map_err(|e| HackevalError::InvalidJobId(format!("{s}: {e}")))
    }
}

/// Current state of an evaluation job.
///
/// `Evaluating` covers the concurrent analysis and testing branches; the
/// flags record which branch has finished. `Scoring` is only reachable once
/// both have.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Fetching,
    Evaluating {
        analysis_done: bool,
        tests_done: bool,
    },
    Scoring,
    Completed,
    Failed {
        reason: FailureReason,
    },
}

impl JobState {
    /// Entry state of the evaluation phase.
    pub fn evaluating() -> Self {
        JobState::Evaluating {
            analysis_done: false,
            tests_done: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed { .. })
    }

    /// Short label used in logs and events.
    pub fn label(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Fetching => "fetching",
            JobState::Evaluating { .. } => "evaluating",
            JobState::Scoring => "scoring",
            JobState::Completed => "completed",
            JobState::Failed { .. } => "failed",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, JobState::Failed { .. }) {
            return true;
        }
        match (self, next) {
            (JobState::Queued, JobState::Fetching) => true,
            (JobState::Fetching, JobState::Evaluating { analysis_done, tests_done }) => {
                !analysis_done && !tests_done
            }
            (
                JobState::Evaluating {
                    analysis_done: a0,
                    tests_done: t0,
                },
                JobState::Evaluating {
                    analysis_done: a1,
                    tests_done: t1,
                },
            ) => {
                // flags only ever flip to true, and something must change
                (*a1 || !a0) && (*t1 || !t0) && (a0 != a1 || t0 != t1)
            }
            (
                JobState::Evaluating {
                    analysis_done: true,
                    tests_done: true,
                },
                JobState::Scoring,
            ) => true,
            (JobState::Scoring, JobState::Completed) => true,
            _ => false,
        }
    }

    /// Validated transition.
    pub fn transition(&self, next: JobState) -> Result<JobState, HackevalError> {
        if self.can_transition_to(&next) {
            Ok(next)
        } else {
            Err(HackevalError::InvalidTransition {
                from: self.label().to_string(),
                to: next.label().to_string(),
            })
        }
    }
}

/// A recorded state change, in order of occurrence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    pub from: JobState,
    pub to: JobState,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::FailureCategory;

    fn failed() -> JobState {
        JobState::Failed {
            reason: FailureReason::new(FailureCategory::Infrastructure, "sandbox_unavailable", "x"),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let s = JobState::Queued;
        let s = s.transition(JobState::Fetching).expect("fetch");
        let s = s.transition(JobState::evaluating()).expect("evaluate");
        let s = s
            .transition(JobState::Evaluating {
                analysis_done: false,
                tests_done: true,
            })
            .expect("tests done");
        let s = s
            .transition(JobState::Evaluating {
                analysis_done: true,
                tests_done: true,
            })
            .expect("analysis done");
        let s = s.transition(JobState::Scoring).expect("score");
        let s = s.transition(JobState::Completed).expect("complete");
        assert!(s.is_terminal());
    }

    #[test]
    fn test_scoring_requires_both_branches() {
        let partial = JobState::Evaluating {
            analysis_done: true,
            tests_done: false,
        };
        assert!(!partial.can_transition_to(&JobState::Scoring));
        assert!(!JobState::evaluating().can_transition_to(&JobState::Scoring));
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal() {
        for s in [
            JobState::Queued,
            JobState::Fetching,
            JobState::evaluating(),
            JobState::Scoring,
        ] {
            assert!(s.can_transition_to(&failed()), "{} -> failed", s.label());
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        assert!(!JobState::Completed.can_transition_to(&failed()));
        assert!(!failed().can_transition_to(&JobState::Fetching));
        let err = JobState::Completed
            .transition(JobState::Fetching)
            .unwrap_err();
        assert!(err.to_string().contains("completed -> fetching"));
    }

    #[test]
    fn test_no_skipping_states() {
        assert!(!JobState::Queued.can_transition_to(&JobState::Scoring));
        assert!(!JobState::Fetching.can_transition_to(&JobState::Completed));
        let done = JobState::Evaluating {
            analysis_done: true,
            tests_done: false,
        };
        assert!(!done.can_transition_to(&JobState::evaluating()));
    }

    #[test]
    fn test_job_state_serde_tagged() {
        let json = serde_json::to_value(JobState::evaluating()).expect("serialize");
        assert_eq!(json["state"], "evaluating");
        assert_eq!(json["analysis_done"], false);
    }

    #[test]
    fn test_job_id_parse() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("parse");
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }
}
