//! Messages placed on the work queue.

use std::fmt;

/// A work queue entry. Each one is taken by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchMessage {
    /// Execute this job.
    Run { job_id: String, command_line: String },
    /// Terminate the worker that takes this message.
    Stop,
}

impl DispatchMessage {
    pub fn run(job_id: impl Into<String>, command_line: impl Into<String>) -> Self {
        DispatchMessage::Run {
            job_id: job_id.into(),
            command_line: command_line.into(),
        }
    }
}

impl fmt::Display for DispatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMessage::Run { job_id, .. } => write!(f, "run({})", job_id),
            DispatchMessage::Stop => write!(f, "stop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_message_display() {
        assert_eq!(DispatchMessage::run("1234", "/bin/ls").to_string(), "run(1234)");
        assert_eq!(DispatchMessage::Stop.to_string(), "stop");
    }
}
