//! Backend abstraction for running commands on a host.
//!
//! The [`Executor`] trait is the only channel the engine uses to observe or
//! change a host, allowing for different implementations:
//! - Local execution via `sh -c`
//! - Remote execution via the system `ssh` client
//! - Scripted fakes for testing

pub mod local;
mod process;
pub mod ssh;

use crate::error::Result;
use crate::types::{CommandOutput, RemoteCommand};
use std::time::Duration;

pub use local::LocalExecutor;
pub use ssh::{SshExecutor, SshTarget};

/// Execution channel to a single host.
///
/// Every call carries a deadline. An implementation must return
/// [`Error::Timeout`](crate::Error::Timeout) rather than block past it.
pub trait Executor: Send + Sync {
    /// Label of the host this executor talks to.
    fn host(&self) -> &str;

    /// Run a command and wait for it, up to `timeout`.
    ///
    /// A non-zero exit is reported in [`CommandOutput::exit_code`], not as
    /// an error.
    fn execute(&self, command: &RemoteCommand, timeout: Duration) -> Result<CommandOutput>;

    /// Run a command and return just success/failure.
    fn execute_status(&self, script: &str, timeout: Duration) -> Result<bool> {
        Ok(self.execute(&RemoteCommand::new(script), timeout)?.success())
    }
}
