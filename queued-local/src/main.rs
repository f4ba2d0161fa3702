use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use queued_local::config::AppConfig;
use queued_local::database::repositories::SqlxPersistedJobRepository;
use queued_local::queue::{JobStatus, JobTracker, QueueManager, ShellJobRunner, TrackingRunner};
use queued_local::{logging, panic_hook};

/// Split an input line into `(job_id, command_line)`.
///
/// `<job_id>\t<command_line>` uses the given id; anything else is a bare
/// command line and gets a fresh UUID. Blank lines yield `None`.
fn parse_job_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match line.split_once('\t') {
        Some((id, command)) if !id.trim().is_empty() && !command.trim().is_empty() => {
            Some((id.trim().to_string(), command.trim().to_string()))
        }
        _ => Some((uuid::Uuid::new_v4().to_string(), line.to_string())),
    }
}

/// Read the next input line, decoding it lossily.
///
/// Returns `None` at end of input, and also on a read error (logged) so the
/// caller falls through to a normal shutdown.
async fn next_input_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => None,
        Ok(_) => Some(String::from_utf8_lossy(buf).into_owned()),
        Err(e) => {
            warn!("Failed to read jobs from stdin, shutting down: {}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;
    panic_hook::install();
    info!(log_dir = %logging_config.log_dir().display(), "Logging initialized");

    let cancel_token = CancellationToken::new();
    let cleanup_task = logging_config.start_retention_cleanup(cancel_token.clone());

    let repository = Arc::new(SqlxPersistedJobRepository::open(&config.store_path).await?);
    info!(path = %repository.path().display(), "Job store opened");

    let mut shell = ShellJobRunner::new();
    if let Some(staging_dir) = &config.staging_dir {
        shell = shell.with_staging_dir(staging_dir);
    }
    let tracker = Arc::new(JobTracker::new());
    let runner = Arc::new(TrackingRunner::new(shell, tracker.clone()));

    let manager =
        QueueManager::start(config.manager.clone(), repository, runner, tracker.clone()).await?;
    info!(
        manager = %manager.name(),
        workers = manager.worker_count(),
        recovered = tracker.len(),
        "queued-local started, reading jobs from stdin"
    );

    let submit_params = HashMap::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut buf = Vec::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, finishing queued jobs (press Ctrl-C again to exit now)");
                break;
            }
            line = next_input_line(&mut stdin, &mut buf) => {
                let Some(line) = line else {
                    break;
                };
                let Some((job_id, command_line)) = parse_job_line(&line) else {
                    continue;
                };
                if let Err(e) = manager.launch(&job_id, &command_line, &submit_params).await {
                    warn!(job_id = %job_id, "Failed to launch job: {}", e);
                }
            }
        }
    }

    tokio::select! {
        res = manager.shutdown() => res?,
        _ = tokio::signal::ctrl_c() => {
            // Unstarted jobs keep their records and are replayed on the next start.
            warn!(
                pending = manager.queued_messages(),
                "Interrupted again, exiting without draining the queue"
            );
            anyhow::bail!("interrupted during shutdown");
        }
    }

    cancel_token.cancel();
    let _ = cleanup_task.await;

    info!(
        jobs = tracker.len(),
        completed = tracker.count_by_status(JobStatus::Completed),
        failed = tracker.count_by_status(JobStatus::Failed),
        "queued-local stopped"
    );
    Ok(())
}
