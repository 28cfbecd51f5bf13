//! Test harness integration tests against the process sandbox.

mod common;

use std::sync::Arc;

use common::{process_sandbox, strings, workspace, UnavailableSandbox};
use hackeval_core::{
    cancel_pair, CancelSignal, EngineConfig, ExecutionStatus, JobId, LimitKind, LimitOverrides,
    OutputCheck, SuiteConfig, TestCase,
};
use hackeval_judge::{HarnessError, TestHarness};

const ADDER: &str = r#"case "$1" in
  crash) echo "boom" >&2; exit 3 ;;
  hang) sleep 5 ;;
  pi) echo "3.14160" ;;
  *) read a b; echo $((a + b)) ;;
esac
"#;

fn harness() -> TestHarness {
    TestHarness::new(Arc::new(EngineConfig::default()), process_sandbox()).expect("harness")
}

fn suite(cases: Vec<TestCase>) -> SuiteConfig {
    SuiteConfig {
        build: None,
        entry: strings(&["sh", "main.sh"]),
        cases,
    }
}

fn with_args(mut case: TestCase, args: &[&str]) -> TestCase {
    case.args = strings(args);
    case
}

#[tokio::test]
async fn test_sum_case_passes_quickly() {
    let (_root, ws) = workspace(&[("main.sh", ADDER)]).await;
    let suite = suite(vec![TestCase::exact("sum", "2 3\n", "5")]);

    let outcome = harness()
        .run_suite(JobId::new(), &ws, &suite, &CancelSignal::never())
        .await
        .expect("suite runs");

    assert_eq!(outcome.executions.len(), 1);
    let run = &outcome.executions[0];
    assert_eq!(run.status, ExecutionStatus::Pass, "{:?}", run.detail);
    assert_eq!(run.stdout.trim(), "5");
    assert!(run.wall_time_ms < 1_000, "took {} ms", run.wall_time_ms);
    assert!(outcome.diagnostics.is_empty());
}

#[tokio::test]
async fn test_results_keep_suite_order_through_failures() {
    let (_root, ws) = workspace(&[("main.sh", ADDER)]).await;
    let quick = LimitOverrides {
        time_ms: Some(300),
        ..LimitOverrides::default()
    };
    let suite = suite(vec![
        TestCase::exact("first", "1 1\n", "2"),
        with_args(TestCase::exact("crash", "", ""), &["crash"]),
        with_args(TestCase::exact("hang", "", ""), &["hang"]).with_limits(quick),
        TestCase::exact("wrong", "1 1\n", "3"),
        TestCase::exact("last", "4 5\n", "9"),
    ]);

    let outcome = harness()
        .run_suite(JobId::new(), &ws, &suite, &CancelSignal::never())
        .await
        .expect("suite runs");

    let names: Vec<&str> = outcome.executions.iter().map(|e| e.case_name.as_str()).collect();
    assert_eq!(names, ["first", "crash", "hang", "wrong", "last"]);
    for (idx, run) in outcome.executions.iter().enumerate() {
        assert_eq!(run.case_index, idx);
    }

    let statuses: Vec<ExecutionStatus> = outcome.executions.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        [
            ExecutionStatus::Pass,
            ExecutionStatus::Crash,
            ExecutionStatus::Timeout,
            ExecutionStatus::Fail,
            ExecutionStatus::Pass,
        ]
    );
    assert_eq!(outcome.executions[1].exit_code, Some(3));
    assert!(outcome.executions[1].stderr.contains("boom"));
    assert_eq!(outcome.executions[2].limit, Some(LimitKind::Time));
}

#[tokio::test]
async fn test_token_check_with_epsilon() {
    let (_root, ws) = workspace(&[("main.sh", ADDER)]).await;
    let mut close = TestCase::exact("pi", "", "");
    close.check = OutputCheck::Tokens {
        expected: "3.1416".to_string(),
        epsilon: 1e-6,
    };
    let mut far = close.clone();
    far.name = "pi-strict".to_string();
    far.check = OutputCheck::Tokens {
        expected: "3.2".to_string(),
        epsilon: 1e-6,
    };
    let suite = suite(vec![with_args(close, &["pi"]), with_args(far, &["pi"])]);

    let outcome = harness()
        .run_suite(JobId::new(), &ws, &suite, &CancelSignal::never())
        .await
        .expect("suite runs");
    assert_eq!(outcome.executions[0].status, ExecutionStatus::Pass);
    assert_eq!(outcome.executions[1].status, ExecutionStatus::Fail);
}

#[tokio::test]
async fn test_missing_entry_point_is_a_submission_problem() {
    let (_root, ws) = workspace(&[("other.sh", "echo hi\n")]).await;
    let suite = suite(vec![
        TestCase::exact("a", "1 1\n", "2"),
        TestCase::exact("b", "2 2\n", "4"),
    ]);

    let outcome = harness()
        .run_suite(JobId::new(), &ws, &suite, &CancelSignal::never())
        .await
        .expect("missing entry is not an error");

    assert_eq!(outcome.executions.len(), 2);
    assert!(outcome.executions.iter().all(|e| !e.status.is_pass()));
    assert_eq!(outcome.diagnostics, ["entry point not found: main.sh"]);
}

#[tokio::test]
async fn test_failed_build_skips_every_case() {
    let (_root, ws) = workspace(&[("main.sh", ADDER)]).await;
    let mut suite = suite(vec![TestCase::exact("a", "1 1\n", "2")]);
    suite.build = Some(strings(&["sh", "-c", "echo 'compile error' >&2; exit 2"]));

    let outcome = harness()
        .run_suite(JobId::new(), &ws, &suite, &CancelSignal::never())
        .await
        .expect("build failure is not an error");

    assert_eq!(outcome.executions.len(), 1);
    assert_eq!(outcome.executions[0].detail.as_deref(), Some("not run: build failed"));
    assert_eq!(outcome.diagnostics.len(), 1);
    assert!(outcome.diagnostics[0].contains("compile error"));
}

#[tokio::test]
async fn test_validator_judges_output() {
    let (_root, ws) = workspace(&[("main.sh", ADDER)]).await;
    let validator = |name: &str, expected: &str| {
        let mut case = TestCase::exact(name, "2 3\n", "");
        case.check = OutputCheck::Validator {
            command: strings(&[
                "sh",
                "-c",
                r#"test "$(cat "$HACKEVAL_OUTPUT")" = "$(cat "$HACKEVAL_EXPECTED")""#,
            ]),
            expected: Some(expected.to_string()),
        };
        case
    };
    let suite = suite(vec![validator("accepts", "5"), validator("rejects", "6")]);

    let outcome = harness()
        .run_suite(JobId::new(), &ws, &suite, &CancelSignal::never())
        .await
        .expect("suite runs");
    assert_eq!(outcome.executions[0].status, ExecutionStatus::Pass, "{:?}", outcome.executions[0].detail);
    assert_eq!(outcome.executions[1].status, ExecutionStatus::Fail);
}

#[tokio::test]
async fn test_sandbox_outage_aborts_suite() {
    let (_root, ws) = workspace(&[("main.sh", ADDER)]).await;
    let sandbox = Arc::new(UnavailableSandbox::default());
    let harness = TestHarness::new(Arc::new(EngineConfig::default()), sandbox).expect("harness");
    let suite = suite(vec![TestCase::exact("a", "1 1\n", "2")]);

    let err = harness
        .run_suite(JobId::new(), &ws, &suite, &CancelSignal::never())
        .await
        .expect_err("outage aborts");
    assert!(matches!(err, HarnessError::Infrastructure(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_cancel_kills_running_case() {
    let (_root, ws) = workspace(&[("main.sh", ADDER)]).await;
    let suite = suite(vec![with_args(TestCase::exact("hang", "", ""), &["hang"])]);
    let (handle, signal) = cancel_pair();
    let harness = harness();

    let started = std::time::Instant::now();
    let run = harness.run_suite(JobId::new(), &ws, &suite, &signal);
    let cancel = async {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        handle.cancel();
    };
    let (result, ()) = tokio::join!(run, cancel);

    assert!(matches!(result, Err(HarnessError::Cancelled)));
    assert!(started.elapsed() < std::time::Duration::from_secs(4));
}
