//! Job registration and status tracking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::runner::JobRunner;
use crate::Result;
use crate::panic_hook::payload_message;

/// Receives every job before it can run.
///
/// `is_new` is true for jobs submitted through `launch` and false for jobs
/// replayed from the persisted record at startup.
pub trait JobRegistry: Send + Sync {
    fn register(&self, job_id: &str, is_new: bool) -> Result<()>;
}

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting on the work queue.
    Queued,
    /// Taken by a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What the tracker knows about one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedJob {
    pub job_id: String,
    pub status: JobStatus,
    /// Whether the job was replayed from a previous run.
    pub recovered: bool,
    pub registered_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// In-memory job tracker.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: DashMap<String, TrackedJob>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: &str) -> Option<TrackedJob> {
        self.jobs.get(job_id).map(|j| j.clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    /// Mark a job as taken by a worker. Unknown ids are ignored.
    pub fn mark_running(&self, job_id: &str) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
        }
    }

    pub fn mark_completed(&self, job_id: &str) {
        self.finish(job_id, JobStatus::Completed, None);
    }

    pub fn mark_failed(&self, job_id: &str, error: impl Into<String>) {
        self.finish(job_id, JobStatus::Failed, Some(error.into()));
    }

    fn finish(&self, job_id: &str, status: JobStatus, error: Option<String>) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            job.status = status;
            job.finished_at = Some(Utc::now());
            job.error = error;
        }
    }
}

impl JobRegistry for JobTracker {
    fn register(&self, job_id: &str, is_new: bool) -> Result<()> {
        self.jobs.insert(
            job_id.to_string(),
            TrackedJob {
                job_id: job_id.to_string(),
                status: JobStatus::Queued,
                recovered: !is_new,
                registered_at: Utc::now(),
                started_at: None,
                finished_at: None,
                error: None,
            },
        );
        Ok(())
    }
}

/// Runner wrapper that reports status changes to a [`JobTracker`].
///
/// A panic in the inner runner marks the job failed and is then resumed, so
/// the caller still sees it.
pub struct TrackingRunner<R> {
    inner: R,
    tracker: Arc<JobTracker>,
}

impl<R: JobRunner> TrackingRunner<R> {
    pub fn new(inner: R, tracker: Arc<JobTracker>) -> Self {
        Self { inner, tracker }
    }
}

#[async_trait]
impl<R: JobRunner> JobRunner for TrackingRunner<R> {
    async fn run(&self, job_id: &str, command_line: &str) -> Result<()> {
        self.tracker.mark_running(job_id);
        let outcome = AssertUnwindSafe(self.inner.run(job_id, command_line))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                self.tracker.mark_completed(job_id);
                Ok(())
            }
            Ok(Err(e)) => {
                self.tracker.mark_failed(job_id, e.to_string());
                Err(e)
            }
            Err(payload) => {
                let message = format!("panicked: {}", payload_message(payload.as_ref()));
                self.tracker.mark_failed(job_id, message);
                std::panic::resume_unwind(payload)
            }
        }
    }
}
