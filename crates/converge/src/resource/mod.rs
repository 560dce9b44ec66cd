//! Resource trait for kind-specific probing and planning
//!
//! A resource knows how to read its target's current condition from the
//! host and how to turn a difference into an ordered list of steps. It
//! never mutates the host itself: the reconciler executes the steps, so
//! check mode and apply mode always agree on what would change.

use crate::context::HostContext;
use crate::error::Result;
use crate::types::ProbedState;
use std::fmt;

pub mod command;
pub mod file;
pub mod line;
pub mod package;
pub mod service;

/// Core trait for declarative resources
///
/// Every resource kind implements this trait, which provides:
/// - Identity (type, target, description)
/// - Static validation of the declaration
/// - State detection (probe, read-only)
/// - Comparison policy (plan: empty when converged)
pub trait Resource: Send + Sync + fmt::Debug {
    /// Resource type category, e.g. `"file"`, `"service"`
    fn resource_type(&self) -> &'static str;

    /// The underlying OS object, e.g. `"file:/etc/hosts"`
    ///
    /// Two declarations with the same target touch the same host state.
    fn target(&self) -> String;

    /// Human-readable description of the desired state
    fn description(&self) -> String;

    /// Reject declarations that can never converge
    fn check(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    /// Read the target's current condition without mutating anything
    fn probe(&self, id: &str, host: &HostContext<'_>) -> Result<ProbedState>;

    /// Steps that take `state` to the desired state, in order
    ///
    /// Must return no steps exactly when applying would leave the host
    /// byte-for-byte and flag-for-flag identical to `state`.
    fn plan(&self, id: &str, state: &ProbedState, host: &HostContext<'_>) -> Result<Vec<Step>>;
}

/// One minimal mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Human-readable summary, e.g. `"mode 0644 -> 0600"`
    pub description: String,
    pub action: Action,
}

impl Step {
    pub fn new(description: impl Into<String>, action: Action) -> Self {
        Self {
            description: description.into(),
            action,
        }
    }
}

/// What a step does to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Stage, validate and atomically promote new file content
    WriteFile {
        path: String,
        content: Vec<u8>,
        mode: u32,
        /// Content being replaced, `None` when creating
        before: Option<Vec<u8>>,
        validate: Option<String>,
    },
    /// Change permission bits only
    Chmod { path: String, mode: u32 },
    /// Delete a file
    RemoveFile { path: String },
    /// Run a mutating script that must exit 0
    Run { script: String },
}

impl Action {
    /// Path of the file this action writes, if any
    pub fn file_path(&self) -> Option<&str> {
        match self {
            Action::WriteFile { path, .. }
            | Action::Chmod { path, .. }
            | Action::RemoveFile { path } => Some(path),
            Action::Run { .. } => None,
        }
    }
}

/// Check that a declared path is absolute.
pub(crate) fn require_absolute(id: &str, path: &str) -> Result<()> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(crate::error::Error::invalid(
            id,
            format!("path must be absolute: {path}"),
        ))
    }
}
