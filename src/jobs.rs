//! Asynchronous analysis jobs.
//!
//! A job is created when a document is accepted for background analysis and
//! polled by the client until it completes or fails. [`JobProgress`] adapts
//! the store to the pipeline's [`ProgressSink`] so strategy transitions show
//! up in poll responses as they happen.

use crate::progress::ProgressSink;
use crate::schema::now_iso8601;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub source_file: String,
    pub created_at: String,
    pub updated_at: String,
    /// Present once the job completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// In-memory job registry. Cheap to clone and share across handlers.
#[derive(Clone, Default)]
pub struct JobStore {
    inner: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, source_file: &str) -> String {
        let id = format!("job_{}", Uuid::new_v4().simple());
        let now = now_iso8601();
        let job = Job {
            id: id.clone(),
            status: JobStatus::Pending,
            progress: 0,
            message: None,
            source_file: source_file.to_string(),
            created_at: now.clone(),
            updated_at: now,
            result: None,
            error: None,
        };
        self.inner.write().unwrap().insert(id.clone(), job);
        debug!("Created job {}", id);
        id
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.inner.read().unwrap().get(id).cloned()
    }

    pub fn set_progress(&self, id: &str, percent: u8, message: &str) {
        let mut jobs = self.inner.write().unwrap();
        if let Some(job) = jobs.get_mut(id) {
            job.status = JobStatus::Processing;
            job.progress = percent;
            job.message = Some(message.to_string());
            job.updated_at = now_iso8601();
        }
    }

    pub fn complete(&self, id: &str, result: serde_json::Value) {
        let mut jobs = self.inner.write().unwrap();
        if let Some(job) = jobs.get_mut(id) {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.message = None;
            job.result = Some(result);
            job.updated_at = now_iso8601();
        }
    }

    pub fn fail(&self, id: &str, error: &str) {
        let mut jobs = self.inner.write().unwrap();
        if let Some(job) = jobs.get_mut(id) {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.updated_at = now_iso8601();
        }
    }
}

/// Progress sink that writes straight into a job record.
pub struct JobProgress {
    store: JobStore,
    job_id: String,
}

impl JobProgress {
    pub fn new(store: JobStore, job_id: String) -> Self {
        Self { store, job_id }
    }
}

impl ProgressSink for JobProgress {
    fn report(&self, percent: u8, message: &str) {
        self.store.set_progress(&self.job_id, percent, message);
    }
}
