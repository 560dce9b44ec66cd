//! SSH backend: runs scripts through the system `ssh` client.
//!
//! Transport, authentication and host-key policy belong to OpenSSH and the
//! user's `~/.ssh/config`; this backend only builds the command line and
//! classifies transport failures (ssh exits 255 when it never reached the
//! remote shell).

use super::Executor;
use super::process::run_with_timeout;
use crate::error::{Error, ErrorCategory, Result};
use crate::types::{CommandOutput, RemoteCommand};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Where and how to connect.
#[derive(Debug, Clone, Default)]
pub struct SshTarget {
    /// Hostname or address
    pub address: String,
    /// Login user; `None` lets ssh decide
    pub user: Option<String>,
    /// Port; `None` lets ssh decide
    pub port: Option<u16>,
    /// Private key passed with `-i`
    pub identity_file: Option<PathBuf>,
    /// Extra `-o` options (`Key=Value`)
    pub options: Vec<String>,
}

impl SshTarget {
    /// Create a target for an address with ssh defaults.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// `user@address` or just `address`.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.address),
            None => self.address.clone(),
        }
    }
}

/// Executor that tunnels every command through `ssh`.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    label: String,
    target: SshTarget,
    program: String,
}

impl SshExecutor {
    /// Create an executor for `target`, labelled `label` in reports.
    pub fn new(label: impl Into<String>, target: SshTarget) -> Self {
        Self {
            label: label.into(),
            target,
            program: "ssh".to_string(),
        }
    }

    /// Build the ssh invocation for one script.
    fn command(&self, script: &str, timeout: Duration) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-o", "BatchMode=yes"]);
        // Never wait on the handshake longer than the whole call may take.
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", timeout.as_secs().max(1)));

        if let Some(port) = self.target.port {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(identity) = &self.target.identity_file {
            cmd.arg("-i").arg(identity);
        }
        for option in &self.target.options {
            cmd.arg("-o").arg(option);
        }

        cmd.arg(self.target.destination()).arg("--").arg(script);
        cmd
    }

    /// Turn an ssh-level failure into a transport error.
    fn classify(&self, output: CommandOutput) -> Result<CommandOutput> {
        if output.exit_code != Some(SSH_TRANSPORT_FAILURE) {
            return Ok(output);
        }

        let message = output.stderr_str().trim().to_string();
        match ErrorCategory::from_stderr(&message) {
            ErrorCategory::Permission => Err(Error::Permission {
                host: self.target.destination(),
                message,
            }),
            ErrorCategory::Unreachable => Err(Error::Unreachable {
                host: self.target.destination(),
                message,
            }),
            // 255 can also be the remote command's own status.
            _ => Ok(output),
        }
    }
}

impl Executor for SshExecutor {
    fn host(&self) -> &str {
        &self.label
    }

    fn execute(&self, command: &RemoteCommand, timeout: Duration) -> Result<CommandOutput> {
        log::trace!("[{}] ssh {} -- {}", self.label, self.target.destination(), command.script);

        let cmd = self.command(&command.script, timeout);
        let output = run_with_timeout(cmd, command.stdin.as_deref(), timeout, &command.script)?;
        self.classify(output)
    }
}
