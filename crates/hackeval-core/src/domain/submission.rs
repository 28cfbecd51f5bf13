//! Submissions: what a participant asks us to evaluate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{HackevalError, Result};

/// Where a submission's code lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    /// Repository URL (or local path for file-based repositories).
    pub repo_url: String,

    /// Branch, tag, or full commit SHA.
    pub reference: String,
}

impl SourceLocation {
    pub fn new(repo_url: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            reference: reference.into(),
        }
    }

    /// Host component of the repository URL, if it has one.
    ///
    /// Handles `scheme://host/...` and scp-like `user@host:path` forms.
    pub fn host(&self) -> Option<&str> {
        let url = self.repo_url.as_str();
        if let Some((_, rest)) = url.split_once("://") {
            let authority = rest.split('/').next().unwrap_or("");
            let host = authority.rsplit('@').next().unwrap_or(authority);
            let host = host.split(':').next().unwrap_or(host);
            return (!host.is_empty()).then_some(host);
        }
        if let Some((user_host, _)) = url.split_once(':') {
            if let Some((_, host)) = user_host.split_once('@') {
                return (!host.is_empty()).then_some(host);
            }
        }
        None
    }
}

/// A participant's code snapshot proposed for evaluation.
///
/// Immutable once created. Re-submission creates a new `Submission` that
/// points at the one it supersedes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    /// Unique identifier for this submission.
    pub submission_id: Uuid,

    /// Participant (or team) identifier.
    pub participant: String,

    /// Source location and ref.
    pub source: SourceLocation,

    /// Hackathon this submission belongs to.
    pub hackathon: String,

    /// Optional track within the hackathon.
    pub track: Option<String>,

    /// Submission this one replaces, if any.
    pub supersedes: Option<Uuid>,

    /// When the submission was created.
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Create a new submission, rejecting blank identifiers.
    pub fn new(
        participant: impl Into<String>,
        source: SourceLocation,
        hackathon: impl Into<String>,
    ) -> Result<Self> {
        let participant = participant.into();
        let hackathon = hackathon.into();

        if participant.trim().is_empty() {
            return Err(HackevalError::InvalidSubmission(
                "participant must not be empty".to_string(),
            ));
        }
        if source.repo_url.trim().is_empty() {
            return Err(HackevalError::InvalidSubmission(
                "repository url must not be empty".to_string(),
            ));
        }
        if source.reference.trim().is_empty() {
            return Err(HackevalError::InvalidSubmission(
                "reference must not be empty".to_string(),
            ));
        }
        if hackathon.trim().is_empty() {
            return Err(HackevalError::InvalidSubmission(
                "hackathon must not be empty".to_string(),
            ));
        }

        Ok(Self {
            submission_id: Uuid::new_v4(),
            participant,
            source,
            hackathon,
            track: None,
            supersedes: None,
            created_at: Utc::now(),
        })
    }

    /// Set the track.
    pub fn with_track(mut self, track: impl Into<String>) -> Self {
        self.track = Some(track.into());
        self
    }

    /// Create the submission that supersedes this one with a new ref.
    pub fn resubmit(&self, reference: impl Into<String>) -> Self {
        Self {
            submission_id: Uuid::new_v4(),
            participant: self.participant.clone(),
            source: SourceLocation::new(self.source.repo_url.clone(), reference),
            hackathon: self.hackathon.clone(),
            track: self.track.clone(),
            supersedes: Some(self.submission_id),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Submission {
        Submission::new(
            "team-rocket",
            SourceLocation::new("https://github.com/team/app.git", "main"),
            "spring-2026",
        )
        .expect("valid submission")
    }

    #[test]
    fn test_new_submission() {
        let sub = sample().with_track("web");
        assert_eq!(sub.participant, "team-rocket");
        assert_eq!(sub.track.as_deref(), Some("web"));
        assert!(sub.supersedes.is_none());
    }

    #[test]
    fn test_blank_fields_rejected() {
        let err = Submission::new("", SourceLocation::new("u", "main"), "h").unwrap_err();
        assert!(err.to_string().contains("participant"));

        let err = Submission::new("p", SourceLocation::new("u", " "), "h").unwrap_err();
        assert!(err.to_string().contains("reference"));
    }

    #[test]
    fn test_resubmit_supersedes_original() {
        let first = sample();
        let second = first.resubmit("v2");
        assert_ne!(first.submission_id, second.submission_id);
        assert_eq!(second.supersedes, Some(first.submission_id));
        assert_eq!(second.source.reference, "v2");
        assert_eq!(first.source.reference, "main");
    }

    #[test]
    fn test_host_extraction() {
        let https = SourceLocation::new("https://github.com/a/b.git", "main");
        assert_eq!(https.host(), Some("github.com"));

        let with_port = SourceLocation::new("ssh://git@example.org:2222/a/b", "main");
        assert_eq!(with_port.host(), Some("example.org"));

        let scp = SourceLocation::new("git@gitlab.com:a/b.git", "main");
        assert_eq!(scp.host(), Some("gitlab.com"));

        let local = SourceLocation::new("/srv/repos/b", "main");
        assert_eq!(local.host(), None);
    }
}
