//! Construction-time configuration.
//!
//! Everything here is resolved once at startup. The binary reads it from the
//! environment (after loading `.env`), the library takes it as plain values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

use crate::{Error, Result};

/// Number of concurrent jobs used when nothing is configured.
pub const DEFAULT_NUM_CONCURRENT_JOBS: usize = 1;

/// Token that selects one worker per available processing unit.
const ALL_PROCESSORS_TOKEN: &str = "*";

const DEFAULT_MANAGER_NAME: &str = "_default_";
const DEFAULT_STORE_PATH: &str = "queued-local.db";
const DEFAULT_LOG_DIR: &str = "logs";

/// How many workers a queue manager runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConcurrentJobs {
    /// Exactly this many workers.
    Fixed(NonZeroUsize),
    /// One worker per processing unit reported by the host.
    AllProcessors,
}

impl ConcurrentJobs {
    /// Resolve to a concrete worker count.
    ///
    /// Falls back to a single worker if the host cannot report its parallelism.
    pub fn resolve(&self) -> usize {
        match self {
            ConcurrentJobs::Fixed(n) => n.get(),
            ConcurrentJobs::AllProcessors => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

impl Default for ConcurrentJobs {
    fn default() -> Self {
        ConcurrentJobs::Fixed(
            NonZeroUsize::new(DEFAULT_NUM_CONCURRENT_JOBS).unwrap_or(NonZeroUsize::MIN),
        )
    }
}

impl fmt::Display for ConcurrentJobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrentJobs::Fixed(n) => write!(f, "{}", n),
            ConcurrentJobs::AllProcessors => f.write_str(ALL_PROCESSORS_TOKEN),
        }
    }
}

impl FromStr for ConcurrentJobs {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == ALL_PROCESSORS_TOKEN {
            return Ok(ConcurrentJobs::AllProcessors);
        }

        let count: usize = s.parse().map_err(|_| {
            Error::config(format!(
                "num_concurrent_jobs must be a positive integer or '{}', got '{}'",
                ALL_PROCESSORS_TOKEN, s
            ))
        })?;

        NonZeroUsize::new(count)
            .map(ConcurrentJobs::Fixed)
            .ok_or_else(|| Error::config("num_concurrent_jobs must be at least 1"))
    }
}

impl TryFrom<String> for ConcurrentJobs {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ConcurrentJobs> for String {
    fn from(value: ConcurrentJobs) -> Self {
        value.to_string()
    }
}

/// Configuration for a [`QueueManager`](crate::queue::QueueManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueManagerConfig {
    /// Manager name, attached to every log line the manager and its workers emit.
    pub name: String,
    /// Worker count.
    #[serde(default)]
    pub num_concurrent_jobs: ConcurrentJobs,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_MANAGER_NAME.to_string(),
            num_concurrent_jobs: ConcurrentJobs::default(),
        }
    }
}

impl QueueManagerConfig {
    pub fn new(name: impl Into<String>, num_concurrent_jobs: ConcurrentJobs) -> Self {
        Self {
            name: name.into(),
            num_concurrent_jobs,
        }
    }
}

/// Process-level configuration used by the `queued-local` binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub manager: QueueManagerConfig,
    /// SQLite file holding the persisted job records.
    pub store_path: PathBuf,
    /// Directory for rotated log files.
    pub log_dir: PathBuf,
    /// Where the shell runner writes per-job stdout/stderr/return_code files.
    pub staging_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let num_concurrent_jobs = match get("QUEUED_LOCAL_NUM_CONCURRENT_JOBS") {
            Some(raw) => raw.parse()?,
            None => ConcurrentJobs::default(),
        };

        Ok(Self {
            manager: QueueManagerConfig {
                name: get("QUEUED_LOCAL_NAME")
                    .unwrap_or_else(|| DEFAULT_MANAGER_NAME.to_string()),
                num_concurrent_jobs,
            },
            store_path: get("QUEUED_LOCAL_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
            log_dir: get("QUEUED_LOCAL_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            staging_dir: get("QUEUED_LOCAL_STAGING_DIR").map(PathBuf::from),
        })
    }
}
