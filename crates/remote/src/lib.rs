//! # remote
//!
//! The execution channel between hostform and the hosts it converges.
//!
//! This crate provides:
//! - An [`Executor`] trait: run a shell script on one host with a deadline
//! - A local backend (`sh -c`) and an `ssh` backend built on the system client
//! - Error categories that separate transient failures from permanent ones
//! - Retry with exponential backoff for transient failures
//!
//! ## Example
//!
//! ```no_run
//! use remote::{Executor, LocalExecutor, RemoteCommand};
//! use std::time::Duration;
//!
//! let exec = LocalExecutor::new();
//! let out = exec
//!     .execute(&RemoteCommand::new("uname -s"), Duration::from_secs(10))
//!     .expect("uname failed");
//! println!("{}", out.stdout_str());
//! ```
//!
//! ## Retry Logic
//!
//! ```no_run
//! use remote::{Executor, RetryConfig, SshExecutor, SshTarget, with_retry};
//! use std::time::Duration;
//!
//! let exec = SshExecutor::new("web1", SshTarget::new("web1.example.com"));
//! let config = RetryConfig::new(3, Duration::from_secs(1), 2.0);
//! let up = with_retry(&config, None, || exec.execute_status("true", Duration::from_secs(5)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod retry;
pub mod shell;
pub mod types;

pub use backend::{Executor, LocalExecutor, SshExecutor, SshTarget};
pub use error::{Error, ErrorCategory, Result};
pub use retry::{LogCallback, RetryCallback, Retryable, with_retry};
pub use types::{CommandOutput, RemoteCommand, RetryConfig};
