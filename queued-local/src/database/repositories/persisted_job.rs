//! Persisted job repository.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::Result;
use crate::database::models::PersistedJob;
use crate::database::{self, WritePool};

/// Durable mapping from job id to command line.
///
/// An entry exists while a job is accepted but not yet taken off the work
/// queue. Implementations must serialize concurrent `put`/`delete` calls and
/// make each write durable before returning.
#[async_trait]
pub trait PersistedJobRepository: Send + Sync {
    /// Record a job. A second `put` for the same id replaces its command line.
    async fn put(&self, job_id: &str, command_line: &str) -> Result<()>;
    /// Remove a job. Removing an unknown id is not an error.
    async fn delete(&self, job_id: &str) -> Result<()>;
    /// Everything currently recorded. Callers must not rely on the order.
    async fn load_all(&self) -> Result<Vec<PersistedJob>>;
    /// Release the underlying resources. No further calls are allowed afterwards.
    async fn close(&self);
}

/// SQLx implementation of PersistedJobRepository.
pub struct SqlxPersistedJobRepository {
    pool: WritePool,
    path: PathBuf,
}

impl SqlxPersistedJobRepository {
    /// Open (or create) the store at `path` and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pool = database::init_write_pool(&path).await?;
        database::run_migrations(&pool).await?;
        Ok(Self { pool, path })
    }

    /// Location of the backing SQLite file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistedJobRepository for SqlxPersistedJobRepository {
    async fn put(&self, job_id: &str, command_line: &str) -> Result<()> {
        let job = PersistedJob::new(job_id, command_line);
        sqlx::query(
            r#"
            INSERT INTO persisted_job (job_id, command_line, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                command_line = excluded.command_line,
                created_at = excluded.created_at
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.command_line)
        .bind(&job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, job_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM persisted_job WHERE job_id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<PersistedJob>> {
        let jobs = sqlx::query_as::<_, PersistedJob>(
            "SELECT job_id, command_line, created_at FROM persisted_job ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::debug!(path = %self.path.display(), "Job store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_load_all() {
        let dir = TempDir::new().unwrap();
        let repo = SqlxPersistedJobRepository::open(dir.path().join("jobs.db"))
            .await
            .unwrap();

        assert!(repo.load_all().await.unwrap().is_empty());

        repo.put("1234", "/bin/ls").await.unwrap();
        repo.put("5678", "echo hi").await.unwrap();

        let jobs = repo.load_all().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job_id, "1234");
        assert_eq!(jobs[0].command_line, "/bin/ls");
        assert_eq!(jobs[1].job_id, "5678");
        assert!(chrono::DateTime::parse_from_rfc3339(&jobs[0].created_at).is_ok());

        repo.close().await;
    }

    #[tokio::test]
    async fn test_put_replaces_command_line() {
        let dir = TempDir::new().unwrap();
        let repo = SqlxPersistedJobRepository::open(dir.path().join("jobs.db"))
            .await
            .unwrap();

        repo.put("1234", "/bin/ls").await.unwrap();
        repo.put("1234", "/bin/true").await.unwrap();

        let jobs = repo.load_all().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].command_line, "/bin/true");

        repo.close().await;
    }

    #[tokio::test]
    async fn test_delete_unknown_is_noop() {
        let dir = TempDir::new().unwrap();
        let repo = SqlxPersistedJobRepository::open(dir.path().join("jobs.db"))
            .await
            .unwrap();

        repo.put("1234", "/bin/ls").await.unwrap();
        repo.delete("missing").await.unwrap();
        assert_eq!(repo.load_all().await.unwrap().len(), 1);

        repo.delete("1234").await.unwrap();
        assert!(repo.load_all().await.unwrap().is_empty());

        repo.close().await;
    }

    #[tokio::test]
    async fn test_operations_fail_after_close() {
        let dir = TempDir::new().unwrap();
        let repo = SqlxPersistedJobRepository::open(dir.path().join("jobs.db"))
            .await
            .unwrap();

        repo.close().await;

        assert!(repo.put("1234", "/bin/ls").await.is_err());
        assert!(repo.load_all().await.is_err());
    }
}
