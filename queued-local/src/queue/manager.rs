//! Queue manager: submission, startup recovery and shutdown.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Instrument, debug, info, info_span, warn};

use super::message::DispatchMessage;
use super::runner::JobRunner;
use super::tracker::JobRegistry;
use super::work_queue::WorkQueue;
use super::worker_pool::WorkerPool;
use crate::config::QueueManagerConfig;
use crate::database::repositories::PersistedJobRepository;
use crate::{Error, Result};

/// Type advertised by [`QueueManager`].
pub const MANAGER_TYPE: &str = "queued-local";

/// A backend that accepts command lines and runs them eventually.
#[async_trait]
pub trait JobManager: Send + Sync {
    fn manager_type(&self) -> &'static str;

    /// Accept a job. Returns once the job is durably recorded and queued.
    async fn launch(
        &self,
        job_id: &str,
        command_line: &str,
        submit_params: &HashMap<String, String>,
    ) -> Result<()>;

    /// Stop accepting jobs, finish the backlog and release resources.
    async fn shutdown(&self) -> Result<()>;
}

/// Runs jobs on a fixed pool of workers fed by a FIFO work queue.
///
/// Every accepted job is written to the [`PersistedJobRepository`] before it is
/// queued and removed just before a worker runs it, so jobs that were queued
/// but not started when the process died are replayed by the next
/// [`QueueManager::start`].
pub struct QueueManager {
    name: String,
    queue: WorkQueue,
    pool: WorkerPool,
    repository: Arc<dyn PersistedJobRepository>,
    registry: Arc<dyn JobRegistry>,
    closed: AtomicBool,
}

impl QueueManager {
    /// Build a manager, replay persisted jobs and start the workers.
    ///
    /// Recovered jobs are queued before any worker exists, so they run ahead of
    /// anything submitted through `launch`. A failure to read the repository
    /// aborts construction.
    pub async fn start(
        config: QueueManagerConfig,
        repository: Arc<dyn PersistedJobRepository>,
        runner: Arc<dyn JobRunner>,
        registry: Arc<dyn JobRegistry>,
    ) -> Result<Self> {
        let workers = config.num_concurrent_jobs.resolve();
        let queue = WorkQueue::new();

        let span = info_span!("queue_manager", manager = %config.name);
        recover(repository.as_ref(), registry.as_ref(), &queue)
            .instrument(span)
            .await?;

        let pool = WorkerPool::new(workers);
        pool.start(&config.name, &queue, repository.clone(), runner);

        Ok(Self {
            name: config.name,
            queue,
            pool,
            repository,
            registry,
            closed: AtomicBool::new(false),
        })
    }

    /// Submit a job.
    ///
    /// The durable write happens before the job is queued. No uniqueness check
    /// is made on `job_id`. `submit_params` is accepted for interface
    /// compatibility and ignored.
    pub async fn launch(
        &self,
        job_id: &str,
        command_line: &str,
        _submit_params: &HashMap<String, String>,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }

        self.registry.register(job_id, true)?;
        self.repository.put(job_id, command_line).await?;
        self.queue.put(DispatchMessage::run(job_id, command_line))?;

        info!(manager = %self.name, job_id = %job_id, "Job queued");
        Ok(())
    }

    /// Drain the backlog, stop every worker and close the repository.
    ///
    /// One `Stop` is queued per worker behind any pending jobs, so everything
    /// queued before this call still runs. Only the first call does the work;
    /// later calls return `Ok(())` straight away.
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(
            manager = %self.name,
            pending = self.queue.len(),
            "Shutting down {} workers",
            self.pool.size()
        );

        for _ in 0..self.pool.size() {
            self.queue.put(DispatchMessage::Stop)?;
        }

        let joined = self.pool.join().await;
        self.repository.close().await;
        joined?;

        info!(manager = %self.name, "Queue manager stopped");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of workers the pool was started with.
    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    /// Number of workers that have not exited yet.
    pub fn active_workers(&self) -> usize {
        self.pool.active_count()
    }

    /// Messages queued but not yet taken by a worker, `Stop` included.
    pub fn queued_messages(&self) -> usize {
        self.queue.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Queue a `Run` for every persisted job, registering each as an existing job.
///
/// Records stay in the repository until a worker takes the message.
async fn recover(
    repository: &dyn PersistedJobRepository,
    registry: &dyn JobRegistry,
    queue: &WorkQueue,
) -> Result<usize> {
    let jobs = repository.load_all().await?;
    let count = jobs.len();

    for job in jobs {
        debug!(job_id = %job.job_id, "Recovering job");
        registry.register(&job.job_id, false)?;
        queue.put(DispatchMessage::run(job.job_id, job.command_line))?;
    }

    if count > 0 {
        info!("Recovered {} persisted jobs", count);
    }
    Ok(count)
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            warn!(
                manager = %self.name,
                "Queue manager dropped without shutdown; workers exit after the backlog"
            );
            self.pool.detach();
        }
    }
}

#[async_trait]
impl JobManager for QueueManager {
    fn manager_type(&self) -> &'static str {
        MANAGER_TYPE
    }

    async fn launch(
        &self,
        job_id: &str,
        command_line: &str,
        submit_params: &HashMap<String, String>,
    ) -> Result<()> {
        QueueManager::launch(self, job_id, command_line, submit_params).await
    }

    async fn shutdown(&self) -> Result<()> {
        QueueManager::shutdown(self).await
    }
}
