//! Error types for convergence runs.
//!
//! Every error names the resource (or handler) it belongs to and can be
//! cloned into the change ledger and serialized into the run report.
//! [`ErrorKind`] drives propagation: transient kinds may be retried by the
//! caller, fatal kinds abort the run.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of convergence errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Host could not be reached while probing or applying
    Unreachable,
    /// Permission denied on the host
    PermissionDenied,
    /// Host returned data that could not be interpreted
    MalformedData,
    /// A remote call exceeded its deadline
    Timeout,
    /// Staged content was rejected by its validator
    ValidationFailed,
    /// A mutating command exited non-zero
    CommandFailed,
    /// A handler failed to run
    HandlerExecution,
    /// A prerequisite resource did not apply successfully first
    PrerequisiteUnmet,
    /// The declaration itself is unusable
    InvalidDeclaration,
    /// A secret reference could not be resolved
    Secret,
    /// The run was cancelled before this resource started
    Cancelled,
}

impl ErrorKind {
    /// Transient errors are worth retrying by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable | Self::PermissionDenied | Self::Timeout
        )
    }

    /// Fatal errors abort the whole run regardless of `required`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PrerequisiteUnmet | Self::InvalidDeclaration | Self::Cancelled
        )
    }

    /// Get a user-friendly description of this kind.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unreachable => "Host unreachable",
            Self::PermissionDenied => "Permission denied",
            Self::MalformedData => "Malformed remote data",
            Self::Timeout => "Timed out",
            Self::ValidationFailed => "Validation failed",
            Self::CommandFailed => "Command failed",
            Self::HandlerExecution => "Handler failed",
            Self::PrerequisiteUnmet => "Prerequisite unmet",
            Self::InvalidDeclaration => "Invalid declaration",
            Self::Secret => "Secret unavailable",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Errors produced while probing, reconciling or flushing handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Error {
    /// Host unreachable
    #[error("{resource}: host unreachable: {detail}")]
    Unreachable { resource: String, detail: String },

    /// Permission denied
    #[error("{resource}: permission denied: {detail}")]
    PermissionDenied { resource: String, detail: String },

    /// Host returned something we cannot interpret
    #[error("{resource}: malformed remote data: {detail}")]
    MalformedData { resource: String, detail: String },

    /// A remote call did not finish in time
    #[error("{resource}: {operation} timed out after {timeout_ms}ms")]
    Timeout {
        resource: String,
        operation: String,
        timeout_ms: u64,
    },

    /// Staged content rejected; the live target was left untouched
    #[error("{resource}: validation failed: {detail}")]
    ValidationFailed { resource: String, detail: String },

    /// A mutating command exited non-zero
    #[error("{resource}: `{command}` failed: {detail}")]
    CommandFailed {
        resource: String,
        command: String,
        detail: String,
    },

    /// Handler command failed
    #[error("handler {handler} failed: {detail}")]
    HandlerExecution { handler: String, detail: String },

    /// Dependent resource reached before its prerequisite applied
    #[error("{resource}: prerequisite {prerequisite} has not applied successfully")]
    PrerequisiteUnmet {
        resource: String,
        prerequisite: String,
    },

    /// Unusable declaration
    #[error("{resource}: invalid declaration: {detail}")]
    InvalidDeclaration { resource: String, detail: String },

    /// Secret reference could not be resolved
    #[error("secret {reference} could not be resolved: {detail}")]
    Secret { reference: String, detail: String },

    /// Run cancelled before this resource started
    #[error("{resource}: run cancelled before this resource started")]
    Cancelled { resource: String },
}

impl Error {
    /// Get the error kind for propagation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Unreachable { .. } => ErrorKind::Unreachable,
            Error::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Error::MalformedData { .. } => ErrorKind::MalformedData,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            Error::CommandFailed { .. } => ErrorKind::CommandFailed,
            Error::HandlerExecution { .. } => ErrorKind::HandlerExecution,
            Error::PrerequisiteUnmet { .. } => ErrorKind::PrerequisiteUnmet,
            Error::InvalidDeclaration { .. } => ErrorKind::InvalidDeclaration,
            Error::Secret { .. } => ErrorKind::Secret,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// The resource, handler or secret reference this error belongs to.
    pub fn subject(&self) -> &str {
        match self {
            Error::Unreachable { resource, .. }
            | Error::PermissionDenied { resource, .. }
            | Error::MalformedData { resource, .. }
            | Error::Timeout { resource, .. }
            | Error::ValidationFailed { resource, .. }
            | Error::CommandFailed { resource, .. }
            | Error::PrerequisiteUnmet { resource, .. }
            | Error::InvalidDeclaration { resource, .. }
            | Error::Cancelled { resource } => resource,
            Error::HandlerExecution { handler, .. } => handler,
            Error::Secret { reference, .. } => reference,
        }
    }

    /// Whether the caller may retry the failed operation.
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    /// Shorthand for an [`Error::InvalidDeclaration`].
    pub fn invalid(resource: &str, detail: impl Into<String>) -> Self {
        Error::InvalidDeclaration {
            resource: resource.to_string(),
            detail: detail.into(),
        }
    }

    /// Shorthand for an [`Error::MalformedData`].
    pub fn malformed(resource: &str, detail: impl Into<String>) -> Self {
        Error::MalformedData {
            resource: resource.to_string(),
            detail: detail.into(),
        }
    }

    /// Attribute an execution-channel error to a resource.
    pub fn from_remote(resource: &str, operation: &str, err: remote::Error) -> Self {
        let resource = resource.to_string();
        match err {
            remote::Error::Timeout { timeout, .. } => Error::Timeout {
                resource,
                operation: operation.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            remote::Error::Unreachable { message, .. } => Error::Unreachable {
                resource,
                detail: message,
            },
            remote::Error::Permission { message, .. } => Error::PermissionDenied {
                resource,
                detail: message,
            },
            other => Error::Unreachable {
                resource,
                detail: other.to_string(),
            },
        }
    }

    /// Classify a command that ran but exited non-zero.
    pub fn from_failed_command(resource: &str, command: &str, stderr: &str) -> Self {
        let detail = stderr.trim().to_string();
        match remote::ErrorCategory::from_stderr(stderr) {
            remote::ErrorCategory::Permission => Error::PermissionDenied {
                resource: resource.to_string(),
                detail,
            },
            remote::ErrorCategory::Unreachable => Error::Unreachable {
                resource: resource.to_string(),
                detail,
            },
            _ => Error::CommandFailed {
                resource: resource.to_string(),
                command: command.to_string(),
                detail,
            },
        }
    }
}

impl remote::Retryable for Error {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Result type for convergence operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_propagation_classes() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::Unreachable.is_transient());
        assert!(!ErrorKind::ValidationFailed.is_transient());
        assert!(ErrorKind::PrerequisiteUnmet.is_fatal());
        assert!(!ErrorKind::HandlerExecution.is_fatal());
    }

    #[test]
    fn test_from_remote_timeout() {
        let err = Error::from_remote(
            "hosts",
            "probe",
            remote::Error::Timeout {
                command: "cat /etc/hosts".to_string(),
                timeout: Duration::from_millis(1500),
            },
        );
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.subject(), "hosts");
        assert!(err.to_string().contains("1500ms"));
    }

    #[test]
    fn test_from_failed_command_permission() {
        let err = Error::from_failed_command("shadow", "cat /etc/shadow", "Permission denied\n");
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let err = Error::ValidationFailed {
            resource: "sshd-config".to_string(),
            detail: "line 3: Bad configuration option".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "validation_failed");
        assert_eq!(json["resource"], "sshd-config");
    }
}
