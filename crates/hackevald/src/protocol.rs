//! JSON-lines request/response protocol.
//!
//! One request object per input line, one response object per output line,
//! in request order.

use hackeval_core::{EvaluationResult, JobId, JobState, SourceLocation, Submission};
use hackeval_judge::{CancelOutcome, Engine, EngineError, ResultLookup};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Submit {
        participant: String,
        repo_url: String,
        reference: String,
        hackathon: String,
        #[serde(default)]
        track: Option<String>,
        #[serde(default)]
        supersedes: Option<Uuid>,
    },
    Result {
        job_id: JobId,
    },
    Cancel {
        job_id: JobId,
    },
    History {
        submission_id: Uuid,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Accepted {
        job_id: JobId,
        submission_id: Uuid,
    },
    Ready {
        result: Box<EvaluationResult>,
    },
    Pending {
        job_id: JobId,
        state: JobState,
    },
    NotFound {
        job_id: JobId,
    },
    Cancelled {
        job_id: JobId,
    },
    AlreadyTerminal {
        job_id: JobId,
    },
    History {
        submission_id: Uuid,
        results: Vec<EvaluationResult>,
    },
    Error {
        code: &'static str,
        message: String,
    },
}

impl Response {
    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }

    fn from_engine_error(err: EngineError) -> Self {
        let code = match &err {
            EngineError::QueueFull { .. } => "queue_full",
            EngineError::NotFound(_) => "not_found",
            EngineError::ShuttingDown => "shutting_down",
            EngineError::Store(_) => "store_error",
            EngineError::Config(_) | EngineError::Setup(_) => "internal_error",
        };
        Response::error(code, err.to_string())
    }
}

/// Parse one input line.
pub fn parse_request(line: &str) -> Result<Request, Response> {
    serde_json::from_str(line).map_err(|e| Response::error("invalid_request", e.to_string()))
}

/// Turn a submit request into a validated submission.
pub fn build_submission(request: Request) -> Result<Submission, Response> {
    let Request::Submit {
        participant,
        repo_url,
        reference,
        hackathon,
        track,
        supersedes,
    } = request
    else {
        return Err(Response::error("invalid_request", "not a submit request"));
    };
    let mut submission = Submission::new(participant, SourceLocation::new(repo_url, reference), hackathon)
        .map_err(|e| Response::error("invalid_submission", e.to_string()))?;
    submission.track = track;
    submission.supersedes = supersedes;
    Ok(submission)
}

/// Execute one request against the engine.
pub async fn handle(engine: &Engine, request: Request) -> Response {
    match request {
        submit @ Request::Submit { .. } => {
            let submission = match build_submission(submit) {
                Ok(submission) => submission,
                Err(response) => return response,
            };
            let submission_id = submission.submission_id;
            match engine.submit(submission).await {
                Ok(job_id) => Response::Accepted {
                    job_id,
                    submission_id,
                },
                Err(e) => Response::from_engine_error(e),
            }
        }
        Request::Result { job_id } => match engine.result(&job_id).await {
            Ok(ResultLookup::Ready(result)) => Response::Ready { result },
            Ok(ResultLookup::Pending(state)) => Response::Pending { job_id, state },
            Ok(ResultLookup::NotFound) => Response::NotFound { job_id },
            Err(e) => Response::from_engine_error(e),
        },
        Request::Cancel { job_id } => match engine.cancel(&job_id).await {
            Ok(CancelOutcome::Cancelled) => Response::Cancelled { job_id },
            Ok(CancelOutcome::AlreadyTerminal) => Response::AlreadyTerminal { job_id },
            Err(EngineError::NotFound(_)) => Response::NotFound { job_id },
            Err(e) => Response::from_engine_error(e),
        },
        Request::History { submission_id } => match engine.history(&submission_id).await {
            Ok(results) => Response::History {
                submission_id,
                results,
            },
            Err(e) => Response::from_engine_error(e),
        },
    }
}

/// Serialize a response as one line (without the newline).
pub fn encode(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        serde_json::json!({"status": "error", "code": "encoding_failed", "message": e.to_string()})
            .to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit() {
        let line = r#"{"op":"submit","participant":"team-7","repo_url":"https://git.example/t7.git","reference":"main","hackathon":"spring"}"#;
        let request = parse_request(line).expect("parse");
        let submission = build_submission(request).expect("valid");
        assert_eq!(submission.participant, "team-7");
        assert_eq!(submission.source.reference, "main");
        assert!(submission.track.is_none());
    }

    #[test]
    fn test_parse_result_and_cancel() {
        let id = JobId::new();
        let result = parse_request(&format!(r#"{{"op":"result","job_id":"{id}"}}"#)).expect("parse");
        assert_eq!(result, Request::Result { job_id: id });
        let cancel = parse_request(&format!(r#"{{"op":"cancel","job_id":"{id}"}}"#)).expect("parse");
        assert_eq!(cancel, Request::Cancel { job_id: id });
    }

    #[test]
    fn test_unknown_op_is_invalid_request() {
        let err = parse_request(r#"{"op":"reboot"}"#).expect_err("unknown op");
        assert!(matches!(err, Response::Error { code: "invalid_request", .. }));
        let err = parse_request("not json").expect_err("garbage");
        assert!(matches!(err, Response::Error { code: "invalid_request", .. }));
    }

    #[test]
    fn test_blank_participant_is_rejected() {
        let line = r#"{"op":"submit","participant":" ","repo_url":"r","reference":"main","hackathon":"h"}"#;
        let err = build_submission(parse_request(line).expect("parse")).expect_err("blank");
        assert!(matches!(err, Response::Error { code: "invalid_submission", .. }));
    }

    #[test]
    fn test_response_encoding() {
        let id = JobId::new();
        let line = encode(&Response::Cancelled { job_id: id });
        let value: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(value["status"], "cancelled");
        assert_eq!(value["job_id"], id.to_string());
        assert!(!line.contains('\n'));

        let pending = encode(&Response::Pending {
            job_id: id,
            state: JobState::Fetching,
        });
        let value: serde_json::Value = serde_json::from_str(&pending).expect("json");
        assert_eq!(value["state"]["state"], "fetching");
    }
}
