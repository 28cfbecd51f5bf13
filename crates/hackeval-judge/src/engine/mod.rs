//! Evaluation orchestrator.
//!
//! `submit` registers a job and places it on a bounded queue; a fixed pool
//! of workers drains the queue and drives each job through
//! `Queued → Fetching → Evaluating → Scoring → Completed`, or to `Failed`
//! from any non-terminal state. Every state change is validated against
//! [`JobState::can_transition_to`] and broadcast as a [`JobEvent`].
//!
//! Results are written to the store before the job is marked terminal, so a
//! terminal state always has a readable result behind it.

mod pipeline;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use hackeval_core::{
    cancel_pair, emit_job_state_changed, emit_job_submitted, CancelHandle, CircuitBreaker,
    ConfigError, EngineConfig, EvaluationResult, FailureReason, Fetcher, JobId, JobState,
    SandboxRunner, SourceProvider, StateTransition, Submission, METRICS,
};
use result_store::{ResultStore, StoreError};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::analyzer::{AnalysisError, StaticAnalyzer};
use crate::harness::{HarnessError, TestHarness};
use crate::scorer::Scorer;

const EVENT_BUFFER: usize = 256;

/// Errors returned by the engine's inbound operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("evaluation queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("engine setup failed: {0}")]
    Setup(String),

    #[error("result store error: {0}")]
    Store(#[from] StoreError),
}

impl From<AnalysisError> for EngineError {
    fn from(err: AnalysisError) -> Self {
        EngineError::Setup(err.to_string())
    }
}

impl From<HarnessError> for EngineError {
    fn from(err: HarnessError) -> Self {
        EngineError::Setup(err.to_string())
    }
}

/// Answer to `result(job_id)`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultLookup {
    Ready(Box<EvaluationResult>),
    Pending(JobState),
    NotFound,
}

/// Answer to `cancel(job_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    AlreadyTerminal,
}

/// A job state change, as broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    pub job_id: JobId,
    #[serde(flatten)]
    pub transition: StateTransition,
}

/// Registry entry for a job this engine has accepted.
struct JobEntry {
    submission: Submission,
    state: JobState,
    cancel: CancelHandle,
    /// Set only when the store refused the final result.
    unsaved: Option<Box<EvaluationResult>>,
}

struct QueuedJob {
    job_id: JobId,
}

/// State shared by the engine handle and its workers.
pub(crate) struct Shared {
    config: Arc<EngineConfig>,
    config_digest: String,
    store: Arc<dyn ResultStore>,
    sandbox: Arc<dyn SandboxRunner>,
    fetcher: Fetcher,
    analyzer: StaticAnalyzer,
    harness: TestHarness,
    scorer: Scorer,
    breaker: CircuitBreaker,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    events: broadcast::Sender<JobEvent>,
}

impl Shared {
    /// Apply a validated transition to a locked entry and announce it.
    fn apply(&self, job_id: JobId, entry: &mut JobEntry, next: JobState) -> bool {
        match entry.state.transition(next) {
            Ok(next) => {
                let transition = StateTransition {
                    from: std::mem::replace(&mut entry.state, next.clone()),
                    to: next,
                    at: Utc::now(),
                };
                emit_job_state_changed(
                    &job_id.to_string(),
                    transition.from.label(),
                    transition.to.label(),
                );
                let _ = self.events.send(JobEvent { job_id, transition });
                true
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "rejected job transition");
                false
            }
        }
    }

    pub(crate) async fn set_state(&self, job_id: JobId, next: JobState) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&job_id) {
            Some(entry) => self.apply(job_id, entry, next),
            None => false,
        }
    }
}

/// The evaluation engine.
pub struct Engine {
    shared: Arc<Shared>,
    queue: std::sync::Mutex<Option<mpsc::Sender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Validate `config`, build every component, and spawn the worker pool.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: Arc<EngineConfig>,
        store: Arc<dyn ResultStore>,
        provider: Arc<dyn SourceProvider>,
        sandbox: Arc<dyn SandboxRunner>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let config_digest = config.config_digest()?;
        let workspace_root = config
            .engine
            .workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        let shared = Arc::new(Shared {
            fetcher: Fetcher::new(provider, config.fetch.clone(), workspace_root),
            analyzer: StaticAnalyzer::from_config(&config)?,
            harness: TestHarness::new(Arc::clone(&config), Arc::clone(&sandbox))?,
            scorer: Scorer::from_config(&config),
            breaker: CircuitBreaker::new(config.engine.breaker_threshold),
            jobs: Mutex::new(HashMap::new()),
            events: broadcast::channel(EVENT_BUFFER).0,
            config_digest,
            store,
            sandbox,
            config: Arc::clone(&config),
        });

        let (tx, rx) = mpsc::channel(config.engine.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..config.engine.workers)
            .map(|worker| tokio::spawn(worker_loop(Arc::clone(&shared), Arc::clone(&rx), worker)))
            .collect();

        tracing::info!(
            workers = config.engine.workers,
            queue_capacity = config.engine.queue_capacity,
            checkers = shared.analyzer.checker_names().len(),
            cases = config.suite.cases.len(),
            "engine started"
        );

        Ok(Self {
            shared,
            queue: std::sync::Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Digest of the configuration stamped on every result.
    pub fn config_digest(&self) -> &str {
        &self.shared.config_digest
    }

    /// Accept a submission for evaluation.
    pub async fn submit(&self, submission: Submission) -> Result<JobId, EngineError> {
        let Some(tx) = self.sender() else {
            return Err(EngineError::ShuttingDown);
        };
        let job_id = JobId::new();
        let (cancel, _) = cancel_pair();
        let participant = submission.participant.clone();
        let source = submission.source.clone();

        self.shared.jobs.lock().await.insert(
            job_id,
            JobEntry {
                submission,
                state: JobState::Queued,
                cancel,
                unsaved: None,
            },
        );

        if let Err(err) = tx.try_send(QueuedJob { job_id }) {
            self.shared.jobs.lock().await.remove(&job_id);
            return Err(match err {
                mpsc::error::TrySendError::Full(_) => EngineError::QueueFull {
                    capacity: self.shared.config.engine.queue_capacity,
                },
                mpsc::error::TrySendError::Closed(_) => EngineError::ShuttingDown,
            });
        }
        emit_job_submitted(
            &job_id.to_string(),
            &participant,
            &source.repo_url,
            &source.reference,
        );
        METRICS.inc_jobs_submitted();
        Ok(job_id)
    }

    /// Current result of a job.
    pub async fn result(&self, job_id: &JobId) -> Result<ResultLookup, EngineError> {
        {
            let jobs = self.shared.jobs.lock().await;
            if let Some(entry) = jobs.get(job_id) {
                if !entry.state.is_terminal() {
                    return Ok(ResultLookup::Pending(entry.state.clone()));
                }
                if let Some(result) = &entry.unsaved {
                    return Ok(ResultLookup::Ready(result.clone()));
                }
            }
        }
        match self.shared.store.get(job_id).await {
            Ok(result) => Ok(ResultLookup::Ready(Box::new(result))),
            Err(StoreError::NotFound { .. }) => Ok(ResultLookup::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Current state of a job this engine accepted.
    pub async fn state(&self, job_id: &JobId) -> Option<JobState> {
        self.shared
            .jobs
            .lock()
            .await
            .get(job_id)
            .map(|e| e.state.clone())
    }

    /// Abort a job. In-flight sandboxed processes are killed; the job ends
    /// `Failed` with reason `cancelled`.
    pub async fn cancel(&self, job_id: &JobId) -> Result<CancelOutcome, EngineError> {
        let known = {
            let mut jobs = self.shared.jobs.lock().await;
            match jobs.get_mut(job_id) {
                Some(entry) if entry.state.is_terminal() => return Ok(CancelOutcome::AlreadyTerminal),
                // a second cancel leaves finishing to the first
                Some(entry) if entry.cancel.is_cancelled() => Some(None),
                Some(entry) => {
                    entry.cancel.cancel();
                    Some(matches!(entry.state, JobState::Queued).then(|| entry.submission.clone()))
                }
                None => None,
            }
        };
        let Some(queued) = known else {
            return match self.shared.store.get(job_id).await {
                Ok(_) => Ok(CancelOutcome::AlreadyTerminal),
                Err(StoreError::NotFound { .. }) => Err(EngineError::NotFound(*job_id)),
                Err(e) => Err(e.into()),
            };
        };
        tracing::info!(job_id = %job_id, queued = queued.is_some(), "cancel requested");

        // a queued job never reaches a worker's pipeline, so finish it here
        if let Some(submission) = queued {
            pipeline::finish_unstarted(&self.shared, *job_id, &submission, FailureReason::cancelled())
                .await;
        }
        Ok(CancelOutcome::Cancelled)
    }

    /// Stream of state changes for every job.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    /// All stored results for a submission, oldest first.
    pub async fn history(&self, submission_id: &Uuid) -> Result<Vec<EvaluationResult>, EngineError> {
        Ok(self.shared.store.history(submission_id).await?)
    }

    /// Wait until `job_id` is terminal and return its result.
    pub async fn wait_for(&self, job_id: &JobId) -> Result<EvaluationResult, EngineError> {
        let mut events = self.subscribe();
        loop {
            match self.result(job_id).await? {
                ResultLookup::Ready(result) => return Ok(*result),
                ResultLookup::NotFound => return Err(EngineError::NotFound(*job_id)),
                ResultLookup::Pending(_) => {}
            }
            loop {
                match events.recv().await {
                    Ok(event) if event.job_id == *job_id && event.transition.to.is_terminal() => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => return Err(EngineError::ShuttingDown),
                }
            }
        }
    }

    /// Stop accepting submissions, let the workers drain the queue, and wait
    /// for them to exit.
    pub async fn shutdown(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.take();
        }
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            let _ = worker.await;
        }
        METRICS.flush();
        tracing::info!("engine stopped");
    }

    /// Cancel every job that has not finished, then shut down.
    pub async fn abort(&self) {
        let queued: Vec<(JobId, Submission)> = {
            let jobs = self.shared.jobs.lock().await;
            jobs.iter()
                .filter(|(_, entry)| !entry.state.is_terminal() && !entry.cancel.is_cancelled())
                .filter_map(|(job_id, entry)| {
                    entry.cancel.cancel();
                    matches!(entry.state, JobState::Queued).then(|| (*job_id, entry.submission.clone()))
                })
                .collect()
        };
        for (job_id, submission) in &queued {
            pipeline::finish_unstarted(&self.shared, *job_id, submission, FailureReason::cancelled()).await;
        }
        self.shutdown().await;
    }

    fn sender(&self) -> Option<mpsc::Sender<QueuedJob>> {
        self.queue.lock().ok().and_then(|q| q.clone())
    }
}

async fn worker_loop(
    shared: Arc<Shared>,
    queue: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    worker: usize,
) {
    tracing::debug!(worker = worker, "worker started");
    loop {
        let next = queue.lock().await.recv().await;
        let Some(QueuedJob { job_id }) = next else {
            break;
        };
        let task = tokio::spawn(pipeline::run_job(Arc::clone(&shared), job_id));
        if let Err(e) = task.await {
            tracing::error!(worker = worker, job_id = %job_id, error = %e, "job task panicked");
            pipeline::finish_after_panic(&shared, job_id).await;
        }
    }
    tracing::debug!(worker = worker, "worker stopped");
}
