//! Queueing, dispatch and recovery.
//!
//! This module provides:
//! - A FIFO work queue shared by every worker
//! - A fixed-size worker pool
//! - The queue manager that ties them to the durable job record

pub mod manager;
pub mod message;
pub mod runner;
pub mod tracker;
pub mod work_queue;
pub mod worker_pool;

pub use manager::{JobManager, MANAGER_TYPE, QueueManager};
pub use message::DispatchMessage;
pub use runner::{JobRunner, ShellJobRunner};
pub use tracker::{JobRegistry, JobStatus, JobTracker, TrackedJob, TrackingRunner};
pub use work_queue::WorkQueue;
pub use worker_pool::WorkerPool;
