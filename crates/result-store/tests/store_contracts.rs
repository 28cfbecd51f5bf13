//! Contract tests for ResultStore.
//!
//! Every conforming implementation must pass these; each test runs against
//! the in-memory fake and the SurrealDB backend.

use chrono::{Duration, Utc};
use hackeval_core::{
    EvaluationResult, FailureCategory, FailureReason, JobId, ResultHeader, SourceLocation,
    Submission,
};
use result_store::{MemoryResultStore, ResultStore, StoreError, SurrealResultStore};

fn submission() -> Submission {
    Submission::new(
        "team-42",
        SourceLocation::new("https://git.example/team-42/app.git", "main"),
        "spring-hack",
    )
    .expect("submission")
}

fn failed_result(sub: &Submission, job_id: JobId, offset_secs: i64) -> EvaluationResult {
    let mut header = ResultHeader::for_submission(job_id, sub, "cfg-digest");
    header.finished_at = Utc::now() + Duration::seconds(offset_secs);
    EvaluationResult::failed(
        header,
        100.0,
        FailureReason::new(FailureCategory::Submission, "ref_ambiguous", "no such ref"),
    )
    .expect("result")
}

async fn stores() -> Vec<(&'static str, Box<dyn ResultStore>)> {
    let memory: Box<dyn ResultStore> = Box::new(MemoryResultStore::new());
    let surreal: Box<dyn ResultStore> =
        Box::new(SurrealResultStore::in_memory().await.expect("surreal"));
    vec![("memory", memory), ("surreal", surreal)]
}

#[tokio::test]
async fn put_then_get_returns_identical_result() {
    for (name, store) in stores().await {
        let sub = submission();
        let result = failed_result(&sub, JobId::new(), 0);
        store.put(&result.job_id, &result).await.expect("put");
        let got = store.get(&result.job_id).await.expect("get");
        assert_eq!(got, result, "{name}");
    }
}

#[tokio::test]
async fn get_missing_is_not_found() {
    for (name, store) in stores().await {
        match store.get(&JobId::new()).await {
            Err(StoreError::NotFound { .. }) => {}
            other => panic!("{name}: expected NotFound, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn identical_put_is_idempotent() {
    for (name, store) in stores().await {
        let sub = submission();
        let result = failed_result(&sub, JobId::new(), 0);
        store.put(&result.job_id, &result).await.expect("first put");
        store.put(&result.job_id, &result)
            .await
            .unwrap_or_else(|e| panic!("{name}: second identical put failed: {e}"));
    }
}

#[tokio::test]
async fn different_put_under_same_job_is_immutable() {
    for (name, store) in stores().await {
        let sub = submission();
        let job_id = JobId::new();
        let first = failed_result(&sub, job_id, 0);
        store.put(&first.job_id, &first).await.expect("put");

        let mut second = first.clone();
        second.submission_diagnostics.push("rewritten".into());
        match store.put(&second.job_id, &second).await {
            Err(StoreError::Immutable { job_id: id }) => assert_eq!(id, job_id.to_string()),
            other => panic!("{name}: expected Immutable, got {:?}", other),
        }
        let kept = store.get(&job_id).await.expect("get");
        assert_eq!(kept, first, "{name}: original must survive");
    }
}

#[tokio::test]
async fn history_is_ordered_by_finish_time() {
    for (name, store) in stores().await {
        let sub = submission();
        let other = submission();
        let late = failed_result(&sub, JobId::new(), 30);
        let early = failed_result(&sub, JobId::new(), -30);
        let unrelated = failed_result(&other, JobId::new(), 0);
        store.put(&late.job_id, &late).await.expect("late");
        store.put(&unrelated.job_id, &unrelated).await.expect("unrelated");
        store.put(&early.job_id, &early).await.expect("early");

        let history = store.history(&sub.submission_id).await.expect("history");
        let ids: Vec<JobId> = history.iter().map(|r| r.job_id).collect();
        assert_eq!(ids, vec![early.job_id, late.job_id], "{name}");
    }
}

#[tokio::test]
async fn surreal_store_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SurrealResultStore::open(&dir.path().join("db"))
        .await
        .expect("open");
    let sub = submission();
    let result = failed_result(&sub, JobId::new(), 0);
    store.put(&result.job_id, &result).await.expect("put");
    let got = store.get(&result.job_id).await.expect("get");
    assert_eq!(got.result_digest, result.result_digest);
    assert!(dir.path().join("db").exists());
}

#[tokio::test]
async fn put_under_wrong_job_is_rejected() {
    for (name, store) in stores().await {
        let sub = submission();
        let result = failed_result(&sub, JobId::new(), 0);
        match store.put(&JobId::new(), &result).await {
            Err(StoreError::JobMismatch { .. }) => {}
            other => panic!("{name}: expected JobMismatch, got {:?}", other),
        }
    }
}
