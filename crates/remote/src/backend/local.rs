//! Local backend: runs scripts with the local `sh`.

use super::Executor;
use super::process::run_with_timeout;
use crate::error::Result;
use crate::types::{CommandOutput, RemoteCommand};
use std::process::Command;
use std::time::Duration;

/// Executor for the machine hostform itself runs on.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    label: String,
    shell: String,
}

impl LocalExecutor {
    /// Create a local executor labelled `localhost`.
    pub fn new() -> Self {
        Self::with_label("localhost")
    }

    /// Create a local executor with a custom host label.
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            shell: "sh".to_string(),
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for LocalExecutor {
    fn host(&self) -> &str {
        &self.label
    }

    fn execute(&self, command: &RemoteCommand, timeout: Duration) -> Result<CommandOutput> {
        log::trace!("[{}] sh -c {}", self.label, command.script);

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&command.script);

        run_with_timeout(cmd, command.stdin.as_deref(), timeout, &command.script)
    }
}
