//! Error types for remote execution.
//!
//! Errors are categorized so callers can decide whether a failed call is
//! worth retrying. A command that ran and exited non-zero is not an error
//! at this layer; callers inspect [`CommandOutput`](crate::CommandOutput)
//! and may use [`ErrorCategory::from_stderr`] to classify it.

use std::time::Duration;
use thiserror::Error;

/// Categories of remote execution errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Host could not be reached (connection refused, DNS, reset)
    Unreachable,
    /// Authentication or file permission failure
    Permission,
    /// The call exceeded its deadline
    Timeout,
    /// The local process could not be started
    Spawn,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable | Self::Timeout)
    }

    /// Get a user-friendly description of this category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unreachable => "Host unreachable",
            Self::Permission => "Permission denied",
            Self::Timeout => "Timed out",
            Self::Spawn => "Could not start command",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for this category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Unreachable => "Check the address, network and that sshd is running",
            Self::Permission => "Check credentials, keys and file permissions on the host",
            Self::Timeout => "Raise settings.timeout_secs or check for a hung command",
            Self::Spawn => "Make sure sh/ssh are installed and on PATH",
            Self::Other => "Check the error details for more information",
        }
    }

    /// Classify the stderr of a command that exited non-zero.
    pub fn from_stderr(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();

        if lower.contains("connection refused")
            || lower.contains("could not resolve")
            || lower.contains("no route to host")
            || lower.contains("connection reset")
            || lower.contains("connection closed")
            || lower.contains("network is unreachable")
            || lower.contains("connection timed out")
        {
            return Self::Unreachable;
        }

        if lower.contains("permission denied")
            || lower.contains("operation not permitted")
            || lower.contains("host key verification failed")
        {
            return Self::Permission;
        }

        Self::Other
    }
}

/// Errors that can occur while running a command on a host.
#[derive(Debug, Error)]
pub enum Error {
    /// The host could not be reached
    #[error("host {host} unreachable: {message}")]
    Unreachable {
        /// Connection target that failed
        host: String,
        /// Transport error text
        message: String,
    },

    /// Authentication was refused
    #[error("permission denied on {host}: {message}")]
    Permission {
        /// Connection target that refused access
        host: String,
        /// Transport error text
        message: String,
    },

    /// The command did not finish before its deadline and was killed
    #[error("command timed out after {}s: {command}", timeout.as_secs_f64())]
    Timeout {
        /// The command line that was running
        command: String,
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// The local process could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// IO error while talking to the child process
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Unreachable { .. } => ErrorCategory::Unreachable,
            Error::Permission { .. } => ErrorCategory::Permission,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::Spawn { .. } => ErrorCategory::Spawn,
            Error::Io(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, Error>;
