//! Job execution.

use async_trait::async_trait;
use process_utils::shell_command;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Executes a single job to completion.
///
/// Workers await `run` directly, so a job occupies its worker until the
/// returned future resolves. An `Err` marks the job as failed; it is logged
/// by the worker and never retried.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job_id: &str, command_line: &str) -> Result<()>;
}

/// Runs command lines through the platform shell.
///
/// Output lines are forwarded to `tracing`. With a staging directory set, the
/// captured `stdout`, `stderr` and `return_code` are also written to
/// `<staging>/<job_id>/` once the process exits.
#[derive(Debug, Clone, Default)]
pub struct ShellJobRunner {
    staging_dir: Option<PathBuf>,
}

impl ShellJobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write each job's output under `staging_dir`.
    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(staging_dir.into());
        self
    }

    /// Directory holding the output files of `job_id`, if output capture is enabled.
    pub fn job_directory(&self, job_id: &str) -> Option<PathBuf> {
        self.staging_dir.as_ref().map(|dir| dir.join(job_id))
    }
}

/// Drain `stream` to EOF, logging each line and returning the raw bytes.
///
/// Lines are split on `\n` and decoded lossily for logging only, so output
/// that is not UTF-8 neither stops the read nor alters what is captured.
async fn collect_output<R>(stream: R, job_id: String, stderr: bool) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut captured = Vec::new();
    loop {
        let start = captured.len();
        match reader.read_until(b'\n', &mut captured).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&captured[start..]);
                let line = line.trim_end_matches(['\n', '\r']);
                if stderr && line.to_lowercase().contains("error") {
                    warn!(job_id = %job_id, "stderr: {}", line);
                } else if stderr {
                    debug!(job_id = %job_id, "stderr: {}", line);
                } else {
                    debug!(job_id = %job_id, "stdout: {}", line);
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, "Failed to read job output: {}", e);
                break;
            }
        }
    }
    captured
}

async fn write_job_outputs(
    job_dir: &Path,
    stdout: &[u8],
    stderr: &[u8],
    code: Option<i32>,
) -> std::io::Result<()> {
    tokio::fs::create_dir_all(job_dir).await?;
    tokio::fs::write(job_dir.join("stdout"), stdout).await?;
    tokio::fs::write(job_dir.join("stderr"), stderr).await?;
    let code = code.map(|c| c.to_string()).unwrap_or_default();
    tokio::fs::write(job_dir.join("return_code"), code).await?;
    Ok(())
}

#[async_trait]
impl JobRunner for ShellJobRunner {
    async fn run(&self, job_id: &str, command_line: &str) -> Result<()> {
        let start = std::time::Instant::now();
        info!(job_id = %job_id, command = %command_line, "Executing job");

        let mut cmd = shell_command(command_line);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(job_dir) = self.job_directory(job_id) {
            tokio::fs::create_dir_all(&job_dir).await?;
            cmd.current_dir(job_dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::other(format!("Failed to spawn job {}: {}", job_id, e)))?;

        let stdout_handle = child
            .stdout
            .take()
            .map(|out| tokio::spawn(collect_output(out, job_id.to_string(), false)));
        let stderr_handle = child
            .stderr
            .take()
            .map(|err| tokio::spawn(collect_output(err, job_id.to_string(), true)));

        let status = child.wait().await.map_err(|e| {
            Error::other(format!("Failed to wait for job {}: {}", job_id, e))
        })?;

        let stdout = match stdout_handle {
            Some(h) => h.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr = match stderr_handle {
            Some(h) => h.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if let Some(job_dir) = self.job_directory(job_id) {
            write_job_outputs(&job_dir, &stdout, &stderr, status.code()).await?;
        }

        let duration = start.elapsed().as_secs_f64();
        if !status.success() {
            return Err(Error::CommandFailed {
                job_id: job_id.to_string(),
                code: status.code(),
            });
        }

        info!(job_id = %job_id, "Job completed in {:.2}s", duration);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_successful_command() {
        let runner = ShellJobRunner::new();
        runner.run("ok", "echo hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_run_failing_command() {
        let runner = ShellJobRunner::new();
        let err = runner.run("bad", "exit 3").await.unwrap_err();
        assert!(matches!(
            err,
            Error::CommandFailed { ref job_id, code: Some(3) } if job_id == "bad"
        ));
    }

    #[tokio::test]
    async fn test_run_unknown_program_fails() {
        let runner = ShellJobRunner::new();
        assert!(runner.run("missing", "nonexistent_command_12345").await.is_err());
    }

    #[tokio::test]
    async fn test_run_writes_outputs_to_staging() {
        let dir = TempDir::new().unwrap();
        let runner = ShellJobRunner::new().with_staging_dir(dir.path());

        runner
            .run("1234", "echo out; echo 'an error' >&2")
            .await
            .unwrap();

        let job_dir = dir.path().join("1234");
        assert_eq!(runner.job_directory("1234"), Some(job_dir.clone()));
        assert_eq!(std::fs::read_to_string(job_dir.join("stdout")).unwrap(), "out\n");
        assert_eq!(
            std::fs::read_to_string(job_dir.join("stderr")).unwrap(),
            "an error\n"
        );
        assert_eq!(std::fs::read_to_string(job_dir.join("return_code")).unwrap(), "0");
    }

    #[tokio::test]
    async fn test_run_records_failure_code_in_staging() {
        let dir = TempDir::new().unwrap();
        let runner = ShellJobRunner::new().with_staging_dir(dir.path());

        assert!(runner.run("5678", "exit 7").await.is_err());
        let code = std::fs::read_to_string(dir.path().join("5678").join("return_code")).unwrap();
        assert_eq!(code, "7");
    }

    #[tokio::test]
    async fn test_run_uses_job_directory_as_cwd() {
        let dir = TempDir::new().unwrap();
        let runner = ShellJobRunner::new().with_staging_dir(dir.path());

        runner.run("cwd", "touch marker").await.unwrap();
        assert!(dir.path().join("cwd").join("marker").exists());
    }

    #[tokio::test]
    async fn test_run_keeps_draining_after_non_utf8_output() {
        let dir = TempDir::new().unwrap();
        let runner = ShellJobRunner::new().with_staging_dir(dir.path());

        runner
            .run("bin", "printf '\\377\\n'; seq 1 200000; echo done")
            .await
            .unwrap();

        let stdout = std::fs::read(dir.path().join("bin").join("stdout")).unwrap();
        assert_eq!(&stdout[..2], b"\xff\n");
        assert!(stdout.ends_with(b"200000\ndone\n"));
        let code = std::fs::read_to_string(dir.path().join("bin").join("return_code")).unwrap();
        assert_eq!(code, "0");
    }
}
