//! Fixed-size pool of workers draining the work queue.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span};

use super::message::DispatchMessage;
use super::runner::JobRunner;
use super::work_queue::{WorkQueue, WorkQueueConsumer};
use crate::database::repositories::PersistedJobRepository;
use crate::panic_hook::payload_message;
use crate::{Error, Result};

/// A pool of workers that each take one message at a time off a [`WorkQueue`].
pub struct WorkerPool {
    /// Number of workers spawned by `start`.
    size: usize,
    /// Workers that have started and not yet exited.
    active_workers: Arc<AtomicUsize>,
    /// Task set for workers.
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

/// Decrements the live worker count when a worker exits, however it exits.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    /// Create a pool of `size` workers. Nothing runs until [`start`](Self::start).
    pub fn new(size: usize) -> Self {
        Self {
            size,
            active_workers: Arc::new(AtomicUsize::new(0)),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Spawn the workers.
    ///
    /// Each worker holds only the receiving side of `queue`, so dropping every
    /// `WorkQueue` handle also lets idle workers exit once the backlog is empty.
    pub fn start(
        &self,
        name: &str,
        queue: &WorkQueue,
        repository: Arc<dyn PersistedJobRepository>,
        runner: Arc<dyn JobRunner>,
    ) {
        info!(manager = %name, "Starting worker pool with {} workers", self.size);

        let mut tasks = self.tasks.lock();
        if let Some(ref mut join_set) = *tasks {
            for i in 0..self.size {
                let span = info_span!("worker", manager = %name, worker = i);
                let consumer = queue.consumer();
                let repository = repository.clone();
                let runner = runner.clone();
                let active = ActiveGuard::enter(&self.active_workers);

                join_set.spawn(
                    async move {
                        let _active = active;
                        debug!("Worker started");
                        worker_loop(consumer, repository, runner).await;
                        debug!("Worker exited");
                    }
                    .instrument(span),
                );
            }
        }
    }

    /// Wait for every worker to exit.
    ///
    /// Returns the first abnormal task exit, after all tasks have been reaped.
    /// Calling `join` again is a no-op.
    pub async fn join(&self) -> Result<()> {
        // Take the join set out of the mutex before awaiting
        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        let mut first_error = None;
        if let Some(mut join_set) = join_set {
            while let Some(res) = join_set.join_next().await {
                if let Err(e) = res {
                    error!("Worker task ended abnormally: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(Error::WorkerJoin(e)),
            None => Ok(()),
        }
    }

    /// Let the workers keep running without anyone joining them.
    ///
    /// Dropping a `JoinSet` aborts its tasks; detaching instead lets each worker
    /// finish the backlog and exit on its own once the queue closes.
    pub fn detach(&self) {
        if let Some(mut join_set) = self.tasks.lock().take() {
            join_set.detach_all();
        }
    }

    /// Number of workers currently alive.
    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Number of workers the pool was created with.
    pub fn size(&self) -> usize {
        self.size
    }
}

async fn worker_loop(
    consumer: WorkQueueConsumer,
    repository: Arc<dyn PersistedJobRepository>,
    runner: Arc<dyn JobRunner>,
) {
    loop {
        let (job_id, command_line) = match consumer.get().await {
            Some(DispatchMessage::Run {
                job_id,
                command_line,
            }) => (job_id, command_line),
            Some(DispatchMessage::Stop) => {
                debug!("Received stop");
                break;
            }
            None => {
                debug!("Work queue closed");
                break;
            }
        };

        // The record must be gone before the job starts.
        if let Err(e) = repository.delete(&job_id).await {
            error!(job_id = %job_id, "Failed to remove persisted job, not running it: {}", e);
            continue;
        }

        debug!(job_id = %job_id, "Running job");
        let outcome = AssertUnwindSafe(runner.run(&job_id, &command_line))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => debug!(job_id = %job_id, "Job finished"),
            Ok(Err(e)) => error!(job_id = %job_id, "Failed to run job: {}", e),
            Err(payload) => error!(
                job_id = %job_id,
                "Job panicked: {}",
                payload_message(payload.as_ref())
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::PersistedJob;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemoryRepository {
        jobs: Mutex<Vec<(String, String)>>,
        fail_delete: bool,
    }

    #[async_trait]
    impl PersistedJobRepository for MemoryRepository {
        async fn put(&self, job_id: &str, command_line: &str) -> Result<()> {
            self.jobs
                .lock()
                .push((job_id.to_string(), command_line.to_string()));
            Ok(())
        }

        async fn delete(&self, job_id: &str) -> Result<()> {
            if self.fail_delete {
                return Err(Error::other("disk gone"));
            }
            self.jobs.lock().retain(|(id, _)| id != job_id);
            Ok(())
        }

        async fn load_all(&self) -> Result<Vec<PersistedJob>> {
            Ok(self
                .jobs
                .lock()
                .iter()
                .map(|(id, cmd)| PersistedJob::new(id.as_str(), cmd.as_str()))
                .collect())
        }

        async fn close(&self) {}
    }

    #[derive(Default)]
    struct RecordingRunner {
        ran: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobRunner for RecordingRunner {
        async fn run(&self, job_id: &str, command_line: &str) -> Result<()> {
            self.ran.lock().push(job_id.to_string());
            match command_line {
                "fail" => Err(Error::other("failed")),
                "panic" => panic!("job blew up"),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_pool_runs_jobs_then_stops() {
        let queue = WorkQueue::new();
        let repo = Arc::new(MemoryRepository::default());
        let runner = Arc::new(RecordingRunner::default());

        repo.put("a", "ok").await.unwrap();
        queue.put(DispatchMessage::run("a", "ok")).unwrap();
        queue.put(DispatchMessage::Stop).unwrap();

        let pool = WorkerPool::new(1);
        pool.start("test", &queue, repo.clone(), runner.clone());
        pool.join().await.unwrap();

        assert_eq!(*runner.ran.lock(), vec!["a".to_string()]);
        assert!(repo.jobs.lock().is_empty());
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn test_failures_and_panics_do_not_stop_worker() {
        let queue = WorkQueue::new();
        let repo = Arc::new(MemoryRepository::default());
        let runner = Arc::new(RecordingRunner::default());

        queue.put(DispatchMessage::run("a", "fail")).unwrap();
        queue.put(DispatchMessage::run("b", "panic")).unwrap();
        queue.put(DispatchMessage::run("c", "ok")).unwrap();
        queue.put(DispatchMessage::Stop).unwrap();

        let pool = WorkerPool::new(1);
        pool.start("test", &queue, repo, runner.clone());
        pool.join().await.unwrap();

        assert_eq!(*runner.ran.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_delete_failure_skips_job() {
        let queue = WorkQueue::new();
        let repo = Arc::new(MemoryRepository {
            fail_delete: true,
            ..Default::default()
        });
        let runner = Arc::new(RecordingRunner::default());

        repo.put("a", "ok").await.unwrap();
        queue.put(DispatchMessage::run("a", "ok")).unwrap();
        queue.put(DispatchMessage::Stop).unwrap();

        let pool = WorkerPool::new(1);
        pool.start("test", &queue, repo.clone(), runner.clone());
        pool.join().await.unwrap();

        assert!(runner.ran.lock().is_empty());
        assert_eq!(repo.jobs.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_workers_exit_when_queue_dropped() {
        let queue = WorkQueue::new();
        let pool = WorkerPool::new(3);
        pool.start(
            "test",
            &queue,
            Arc::new(MemoryRepository::default()),
            Arc::new(RecordingRunner::default()),
        );
        assert_eq!(pool.active_count(), 3);

        drop(queue);
        pool.join().await.unwrap();
        assert_eq!(pool.active_count(), 0);

        // A second join has nothing left to wait for.
        pool.join().await.unwrap();
    }
}
