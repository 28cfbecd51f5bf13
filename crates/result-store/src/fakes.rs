//! In-memory result store for tests and one-shot CLI runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use hackeval_core::{EvaluationResult, JobId};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store_traits::{check_job, history_order, ResultStore};

/// `HashMap<job id, serialized result>` behind a mutex.
///
/// Stores the serialized form so `get` hands back an independent copy and
/// idempotency compares exactly what a durable backend would compare.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    results: Mutex<HashMap<String, String>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.results.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put(&self, job_id: &JobId, result: &EvaluationResult) -> StoreResult<()> {
        check_job(job_id, result)?;
        let key = result.job_id.to_string();
        let payload = serde_json::to_string(result)?;
        let mut results = self.lock();
        match results.get(&key) {
            Some(existing) if *existing == payload => Ok(()),
            Some(_) => Err(StoreError::Immutable { job_id: key }),
            None => {
                results.insert(key, payload);
                Ok(())
            }
        }
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<EvaluationResult> {
        let key = job_id.to_string();
        let payload = self
            .lock()
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound { job_id: key })?;
        Ok(serde_json::from_str(&payload)?)
    }

    async fn history(&self, submission_id: &Uuid) -> StoreResult<Vec<EvaluationResult>> {
        let payloads: Vec<String> = self.lock().values().cloned().collect();
        let mut out = Vec::new();
        for payload in payloads {
            let result: EvaluationResult = serde_json::from_str(&payload)?;
            if result.submission_id == *submission_id {
                out.push(result);
            }
        }
        out.sort_by(history_order);
        Ok(out)
    }
}
