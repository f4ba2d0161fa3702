//! Database row models.

use sqlx::FromRow;

/// A job that was accepted but whose `Run` message has not been taken by a worker yet.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PersistedJob {
    pub job_id: String,
    pub command_line: String,
    /// RFC 3339 timestamp of the last `put`.
    pub created_at: String,
}

impl PersistedJob {
    pub fn new(job_id: impl Into<String>, command_line: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            command_line: command_line.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
