use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinSet;

use queued_local::database::repositories::{PersistedJobRepository, SqlxPersistedJobRepository};

fn ids(jobs: &[queued_local::database::models::PersistedJob]) -> HashSet<String> {
    jobs.iter().map(|j| j.job_id.clone()).collect()
}

#[tokio::test]
async fn records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.db");

    let repo = SqlxPersistedJobRepository::open(&path).await.unwrap();
    repo.put("1234", "/bin/ls").await.unwrap();
    repo.put("5678", "echo 'two words'").await.unwrap();
    repo.put("9999", "true").await.unwrap();
    repo.delete("9999").await.unwrap();
    repo.close().await;

    let reopened = SqlxPersistedJobRepository::open(&path).await.unwrap();
    let jobs = reopened.load_all().await.unwrap();
    assert_eq!(ids(&jobs), HashSet::from(["1234".to_string(), "5678".to_string()]));

    let quoted = jobs.iter().find(|j| j.job_id == "5678").unwrap();
    assert_eq!(quoted.command_line, "echo 'two words'");
    reopened.close().await;
}

#[tokio::test]
async fn writes_are_visible_without_close() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.db");

    // Dropped without `close`, as after a crash.
    {
        let repo = SqlxPersistedJobRepository::open(&path).await.unwrap();
        repo.put("1234", "/bin/ls").await.unwrap();
    }

    let reopened = SqlxPersistedJobRepository::open(&path).await.unwrap();
    let jobs = reopened.load_all().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].command_line, "/bin/ls");
    reopened.close().await;
}

#[tokio::test]
async fn concurrent_puts_and_deletes_are_serialized() {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(
        SqlxPersistedJobRepository::open(dir.path().join("jobs.db"))
            .await
            .unwrap(),
    );

    let mut tasks = JoinSet::new();
    for i in 0..50 {
        let repo = repo.clone();
        tasks.spawn(async move {
            let id = format!("job-{i}");
            repo.put(&id, "sleep 0").await.unwrap();
            if i % 2 == 0 {
                repo.delete(&id).await.unwrap();
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    let jobs = repo.load_all().await.unwrap();
    assert_eq!(jobs.len(), 25);
    assert!(jobs.iter().all(|j| {
        let n: usize = j.job_id.trim_start_matches("job-").parse().unwrap();
        n % 2 == 1
    }));
    repo.close().await;
}

#[tokio::test]
async fn open_creates_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fresh.db");
    assert!(!path.exists());

    let repo = SqlxPersistedJobRepository::open(&path).await.unwrap();
    assert!(path.exists());
    assert_eq!(repo.path(), path.as_path());
    assert!(repo.load_all().await.unwrap().is_empty());
    repo.close().await;
}
