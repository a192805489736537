use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::core::executor::{ExecutionResult, Executor};
use crate::core::lifecycle::LifecycleManager;

const PROMPT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    /// First 100 characters of the submitted prompt.
    pub prompt: String,
    /// Unix seconds.
    pub created: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
}

pub fn prompt_preview(prompt: &str) -> String {
    prompt.chars().take(PROMPT_PREVIEW_CHARS).collect()
}

pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Shared, lock-guarded map of background jobs keyed by job id.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<Mutex<HashMap<String, JobRecord>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_queued(&self, job_id: &str, prompt: &str) {
        self.insert_at(job_id, prompt, unix_now()).await;
    }

    async fn insert_at(&self, job_id: &str, prompt: &str, created: f64) {
        let record = JobRecord {
            status: JobStatus::Queued,
            prompt: prompt_preview(prompt),
            created,
            output: None,
            error: None,
            return_code: None,
        };
        self.jobs.lock().await.insert(job_id.to_string(), record);
    }

    pub async fn mark_running(&self, job_id: &str) {
        if let Some(job) = self.jobs.lock().await.get_mut(job_id) {
            job.status = JobStatus::Running;
        }
    }

    /// Copies the executor's final fields onto the record. Jobs swept while
    /// running are not resurrected.
    pub async fn finish(&self, result: &ExecutionResult) {
        if let Some(job) = self.jobs.lock().await.get_mut(&result.job_id) {
            job.status = result.status;
            job.output = result.output.clone();
            job.error = result.error.clone();
            job.return_code = result.return_code;
        }
    }

    pub async fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.lock().await.get(job_id).cloned()
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Vec<(String, JobRecord)> {
        let mut jobs: Vec<(String, JobRecord)> = self
            .jobs
            .lock()
            .await
            .iter()
            .map(|(id, job)| (id.clone(), job.clone()))
            .collect();
        jobs.sort_by(|a, b| a.1.created.total_cmp(&b.1.created));
        jobs
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Drops every record created more than `retention` before `now`.
    /// Returns how many were removed.
    pub async fn sweep(&self, now: f64, retention: Duration) -> usize {
        let cutoff = now - retention.as_secs_f64();
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| job.created >= cutoff);
        let removed = before - jobs.len();
        if removed > 0 {
            info!("Cleaned up {} old jobs", removed);
        }
        removed
    }

    /// Queues `prompt` and runs it on its own task. Returns the new job id.
    pub async fn submit(&self, executor: &Executor, prompt: String) -> String {
        let job_id = uuid::Uuid::new_v4().to_string();
        self.insert_queued(&job_id, &prompt).await;

        let store = self.clone();
        let executor = executor.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            store.mark_running(&id).await;
            let result = executor.execute(&prompt, &id).await;
            if result.status == JobStatus::Error {
                error!("[{}] Job failed: {}", id, result.error.as_deref().unwrap_or("unknown error"));
            }
            store.finish(&result).await;
        });
        job_id
    }
}

/// Periodically drops jobs older than `retention`.
pub async fn schedule_sweep(
    lifecycle: &LifecycleManager,
    store: &JobStore,
    interval: Duration,
    retention: Duration,
) -> anyhow::Result<()> {
    let store = store.clone();
    lifecycle
        .every("job-sweep", interval, move || {
            let store = store.clone();
            async move {
                store.sweep(unix_now(), retention).await;
            }
        })
        .await
}
