//! SurrealDB-backed ResultStore implementation
//!
//! One row per job in `evaluation_results`. The full result is serialized
//! into `payload` and written by a single `CREATE`, so a reader never sees
//! a partial row. A UNIQUE index on `job_id` makes the first write win.

use async_trait::async_trait;
use chrono::SecondsFormat;
use hackeval_core::{EvaluationResult, JobId};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store_traits::{check_job, history_order, ResultStore};

const NAMESPACE: &str = "hackeval";
const DATABASE: &str = "results";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResultRow {
    job_id: String,
    submission_id: String,
    participant: String,
    hackathon: String,
    status: String,
    composite_score: f64,
    /// Fixed-width RFC 3339 so string order is time order.
    finished_at: String,
    payload: String,
}

impl ResultRow {
    fn from_result(result: &EvaluationResult) -> StoreResult<Self> {
        let status = serde_json::to_value(result.status)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            job_id: result.job_id.to_string(),
            submission_id: result.submission_id.to_string(),
            participant: result.participant.clone(),
            hackathon: result.hackathon.clone(),
            status,
            composite_score: result.composite_score,
            finished_at: result
                .finished_at
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            payload: serde_json::to_string(result)?,
        })
    }

    fn into_result(self) -> StoreResult<EvaluationResult> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// SurrealDB-backed implementation of [`ResultStore`].
#[derive(Clone)]
pub struct SurrealResultStore {
    db: Surreal<Any>,
}

impl SurrealResultStore {
    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`, `ws://...`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect to {url}: {e}")))?;
        db.use_ns(NAMESPACE).use_db(DATABASE).await?;

        let store = Self { db };
        store.init_schema().await?;
        info!(url = %url, "result store connected");
        Ok(store)
    }

    /// Ephemeral store for tests.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect("mem://").await
    }

    /// Durable local store rooted at `path`.
    pub async fn open(path: &std::path::Path) -> StoreResult<Self> {
        std::fs::create_dir_all(path).map_err(|e| {
            StoreError::Backend(format!(
                "failed to create database directory {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::connect(&format!("surrealkv://{}", path.display())).await
    }

    async fn init_schema(&self) -> StoreResult<()> {
        debug!("initializing evaluation_results table");
        let sql = r#"
            DEFINE TABLE IF NOT EXISTS evaluation_results SCHEMALESS
                PERMISSIONS
                    FOR create FULL
                    FOR read FULL
                    FOR update NONE
                    FOR delete NONE;

            -- first write wins
            DEFINE INDEX IF NOT EXISTS idx_job_id ON TABLE evaluation_results COLUMNS job_id UNIQUE;

            DEFINE INDEX IF NOT EXISTS idx_submission_id ON TABLE evaluation_results COLUMNS submission_id;
            DEFINE INDEX IF NOT EXISTS idx_participant ON TABLE evaluation_results COLUMNS hackathon, participant;
        "#;
        self.db.query(sql).await?.check()?;
        Ok(())
    }

    async fn fetch_row(&self, job_id: &str) -> StoreResult<Option<ResultRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM evaluation_results WHERE job_id = $jid")
            .bind(("jid", job_id.to_string()))
            .await?;
        let rows: Vec<ResultRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl ResultStore for SurrealResultStore {
    async fn put(&self, job_id: &JobId, result: &EvaluationResult) -> StoreResult<()> {
        check_job(job_id, result)?;
        let row = ResultRow::from_result(result)?;
        let job_id = row.job_id.clone();
        let payload = row.payload.clone();
        debug!(job_id = %job_id, "writing evaluation result");

        let created: Result<Option<ResultRow>, surrealdb::Error> =
            self.db.create("evaluation_results").content(row).await;
        match created {
            Ok(_) => Ok(()),
            Err(err) => match self.fetch_row(&job_id).await? {
                Some(existing) if existing.payload == payload => Ok(()),
                Some(_) => Err(StoreError::Immutable { job_id }),
                None => Err(StoreError::Backend(err.to_string())),
            },
        }
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<EvaluationResult> {
        let key = job_id.to_string();
        self.fetch_row(&key)
            .await?
            .ok_or(StoreError::NotFound { job_id: key })?
            .into_result()
    }

    async fn history(&self, submission_id: &Uuid) -> StoreResult<Vec<EvaluationResult>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM evaluation_results WHERE submission_id = $sid \
                 ORDER BY finished_at ASC, job_id ASC",
            )
            .bind(("sid", submission_id.to_string()))
            .await?;
        let rows: Vec<ResultRow> = res.take(0)?;
        let mut out = rows
            .into_iter()
            .map(ResultRow::into_result)
            .collect::<StoreResult<Vec<_>>>()?;
        out.sort_by(history_order);
        Ok(out)
    }
}
