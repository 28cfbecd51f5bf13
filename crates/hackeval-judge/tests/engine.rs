//! End-to-end engine tests: submit through fetch, evaluation, scoring and
//! storage, plus cancellation, backpressure and infrastructure failures.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    process_sandbox, strings, submission, PanickingSandbox, TarProvider, UnavailableSandbox,
};
use hackeval_core::{
    EngineConfig, EvaluationStatus, ExecutionStatus, FailureCategory, JobId, JobState,
    LimitOverrides, SandboxRunner, SuiteConfig, TestCase,
};
use hackeval_judge::{CancelOutcome, Engine, EngineError, JobEvent, ResultLookup};
use result_store::MemoryResultStore;
use tempfile::TempDir;

const PROGRAM: &str = r#"case "$1" in
  hang) sleep 30 ;;
  *) read a b; echo $((a + b)) ;;
esac
"#;

fn config(workspaces: &TempDir, cases: Vec<TestCase>) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.engine.workspace_root = Some(workspaces.path().to_path_buf());
    config.engine.backoff_base_ms = 10;
    config.sandbox.mode = hackeval_core::IsolationMode::BestEffort;
    config.suite = SuiteConfig {
        build: None,
        entry: strings(&["sh", "main.sh"]),
        cases,
    };
    config
}

fn sum_cases() -> Vec<TestCase> {
    vec![
        TestCase::exact("small", "2 3\n", "5").with_weight(2),
        TestCase::exact("large", "40 2\n", "42"),
    ]
}

fn hang_case() -> TestCase {
    let mut case = TestCase::exact("hang", "", "").with_limits(LimitOverrides {
        time_ms: Some(60_000),
        ..LimitOverrides::default()
    });
    case.args = strings(&["hang"]);
    case
}

fn start(config: EngineConfig, sandbox: Arc<dyn SandboxRunner>) -> Engine {
    Engine::start(
        Arc::new(config),
        Arc::new(MemoryResultStore::new()),
        Arc::new(TarProvider::new(&[("main.sh", PROGRAM)])),
        sandbox,
    )
    .expect("engine starts")
}

async fn wait_for_state(
    events: &mut tokio::sync::broadcast::Receiver<JobEvent>,
    job_id: JobId,
    matches: fn(&JobState) -> bool,
) {
    loop {
        let event = events.recv().await.expect("event stream open");
        if event.job_id == job_id && matches(&event.transition.to) {
            return;
        }
    }
}

#[tokio::test]
async fn test_evaluation_completes_and_is_stored() {
    let workspaces = tempfile::tempdir().expect("tempdir");
    let engine = start(config(&workspaces, sum_cases()), process_sandbox());
    let sub = submission("main");

    let job_id = engine.submit(sub.clone()).await.expect("accepted");
    let result = engine.wait_for(&job_id).await.expect("finished");

    assert_eq!(result.status, EvaluationStatus::Completed, "{:?}", result.failure);
    assert_eq!(result.commit.as_deref(), Some(TarProvider::commit().as_str()));
    assert_eq!(result.config_digest, engine.config_digest());
    assert_eq!(result.executions.len(), 2);
    assert!(result.executions.iter().all(|e| e.status == ExecutionStatus::Pass));
    assert_eq!(result.sub_scores.correctness, 100.0);
    assert!(result.composite_score > 0.0 && result.composite_score <= result.max_score);

    let history = engine.history(&sub.submission_id).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].job_id, job_id);
    assert_eq!(
        engine.result(&job_id).await.expect("lookup"),
        ResultLookup::Ready(Box::new(result))
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_same_submission_and_config_give_same_digest() {
    let workspaces = tempfile::tempdir().expect("tempdir");
    let engine = start(config(&workspaces, sum_cases()), process_sandbox());

    let first = engine.submit(submission("main")).await.expect("accepted");
    let second = engine.submit(submission("main")).await.expect("accepted");
    let a = engine.wait_for(&first).await.expect("first finished");
    let b = engine.wait_for(&second).await.expect("second finished");

    assert!(a.is_completed() && b.is_completed());
    assert_ne!(a.job_id, b.job_id);
    assert_eq!(a.composite_score, b.composite_score);
    assert_eq!(a.result_digest, b.result_digest);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_state_changes_follow_the_pipeline() {
    let workspaces = tempfile::tempdir().expect("tempdir");
    let engine = start(config(&workspaces, sum_cases()), process_sandbox());
    let mut events = engine.subscribe();

    let job_id = engine.submit(submission("main")).await.expect("accepted");
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.expect("event stream open");
        if event.job_id != job_id {
            continue;
        }
        let done = event.transition.to.is_terminal();
        seen.push(event.transition.to.label());
        if done {
            break;
        }
    }

    assert_eq!(seen.first(), Some(&JobState::Fetching.label()));
    assert_eq!(seen.last(), Some(&JobState::Completed.label()));
    let scoring = seen.iter().position(|s| *s == JobState::Scoring.label());
    let evaluating = seen.iter().position(|s| *s == JobState::evaluating().label());
    assert!(evaluating.is_some() && evaluating < scoring);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_unknown_branch_fails_as_submission_problem() {
    let workspaces = tempfile::tempdir().expect("tempdir");
    let engine = start(config(&workspaces, sum_cases()), process_sandbox());

    let job_id = engine.submit(submission("no-such-branch")).await.expect("accepted");
    let result = engine.wait_for(&job_id).await.expect("finished");

    assert_eq!(result.status, EvaluationStatus::Failed);
    let reason = result.failure.expect("failure reason");
    assert_eq!(reason.code, "ref_ambiguous");
    assert_eq!(reason.category, FailureCategory::Submission);
    assert_eq!(result.composite_score, 0.0);
    assert!(result.commit.is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_cancel_kills_running_evaluation() {
    let workspaces = tempfile::tempdir().expect("tempdir");
    let engine = start(config(&workspaces, vec![hang_case()]), process_sandbox());
    let mut events = engine.subscribe();

    let job_id = engine.submit(submission("main")).await.expect("accepted");
    wait_for_state(&mut events, job_id, |s| matches!(s, JobState::Evaluating { .. })).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    assert_eq!(engine.cancel(&job_id).await.expect("cancel"), CancelOutcome::Cancelled);
    let result = engine.wait_for(&job_id).await.expect("finished");

    assert!(started.elapsed() < Duration::from_secs(10));
    let reason = result.failure.expect("failure reason");
    assert_eq!(reason.code, "cancelled");
    assert_eq!(reason.category, FailureCategory::Cancelled);
    assert_eq!(
        engine.cancel(&job_id).await.expect("second cancel"),
        CancelOutcome::AlreadyTerminal
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_rejects_submissions() {
    let workspaces = tempfile::tempdir().expect("tempdir");
    let mut config = config(&workspaces, vec![hang_case()]);
    config.engine.workers = 1;
    config.engine.queue_capacity = 1;
    let engine = start(config, process_sandbox());

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        outcomes.push(engine.submit(submission("main")).await);
    }
    assert!(outcomes[0].is_ok());
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, Err(EngineError::QueueFull { capacity: 1 }))));
    engine.abort().await;
}

#[tokio::test]
async fn test_sandbox_outage_fails_job_as_infrastructure() {
    let workspaces = tempfile::tempdir().expect("tempdir");
    let mut config = config(&workspaces, sum_cases());
    config.engine.infra_retries = 1;
    config.engine.per_job_concurrency = 1;
    let sandbox = Arc::new(UnavailableSandbox::default());
    let engine = start(config, Arc::clone(&sandbox) as Arc<dyn SandboxRunner>);

    let job_id = engine.submit(submission("main")).await.expect("accepted");
    let result = engine.wait_for(&job_id).await.expect("finished");

    let reason = result.failure.expect("failure reason");
    assert_eq!(reason.category, FailureCategory::Infrastructure);
    assert_eq!(reason.code, "sandbox_unavailable");
    // two attempts, each stopping at the first case
    assert_eq!(sandbox.calls.load(Ordering::Relaxed), 2);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_panicking_job_is_recorded_as_internal_error() {
    let workspaces = tempfile::tempdir().expect("tempdir");
    let engine = start(config(&workspaces, sum_cases()), Arc::new(PanickingSandbox));

    let job_id = engine.submit(submission("main")).await.expect("accepted");
    let result = tokio::time::timeout(Duration::from_secs(10), engine.wait_for(&job_id))
        .await
        .expect("job finished after the panic")
        .expect("finished");

    assert_eq!(result.status, EvaluationStatus::Failed);
    let reason = result.failure.expect("failure reason");
    assert_eq!(reason.category, FailureCategory::Infrastructure);
    assert_eq!(reason.code, "internal_error");

    // the worker survives and keeps serving the queue
    let next = engine.submit(submission("main")).await.expect("accepted");
    let again = tokio::time::timeout(Duration::from_secs(10), engine.wait_for(&next))
        .await
        .expect("second job finished")
        .expect("finished");
    assert_eq!(again.status, EvaluationStatus::Failed);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_unknown_job_lookups() {
    let workspaces = tempfile::tempdir().expect("tempdir");
    let engine = start(config(&workspaces, sum_cases()), process_sandbox());
    let stranger = JobId::new();

    assert_eq!(engine.result(&stranger).await.expect("lookup"), ResultLookup::NotFound);
    assert!(engine.state(&stranger).await.is_none());
    assert!(matches!(
        engine.cancel(&stranger).await,
        Err(EngineError::NotFound(id)) if id == stranger
    ));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_submit_after_shutdown_is_rejected() {
    let workspaces = tempfile::tempdir().expect("tempdir");
    let engine = start(config(&workspaces, sum_cases()), process_sandbox());
    engine.shutdown().await;

    assert!(matches!(
        engine.submit(submission("main")).await,
        Err(EngineError::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_invalid_config_is_rejected_at_start() {
    let workspaces = tempfile::tempdir().expect("tempdir");
    let mut config = config(&workspaces, sum_cases());
    config.scoring.weights.quality = 90;

    let err = Engine::start(
        Arc::new(config),
        Arc::new(MemoryResultStore::new()),
        Arc::new(TarProvider::new(&[])),
        process_sandbox(),
    )
    .err()
    .expect("weights must sum to 100");
    assert!(matches!(err, EngineError::Config(_)));
}
