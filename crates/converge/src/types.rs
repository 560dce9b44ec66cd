//! Core types for convergence runs

use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Whether a run may mutate the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Predict changes without making them
    Check,
    /// Make the changes
    #[default]
    Apply,
}

impl Mode {
    /// Mode for a global check flag.
    pub fn from_check_flag(check: bool) -> Self {
        if check { Self::Check } else { Self::Apply }
    }

    pub fn is_check(&self) -> bool {
        matches!(self, Self::Check)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Check => f.write_str("check"),
            Mode::Apply => f.write_str("apply"),
        }
    }
}

/// Presence requirement shared by several resource kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

/// Snapshot of one resource's current condition on the host.
///
/// Recomputed every run and never cached across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbedState {
    /// A regular file; `content: None` when it does not exist
    File {
        content: Option<Vec<u8>>,
        mode: Option<u32>,
    },
    /// An OS package; `version: None` when not installed
    Package { version: Option<String> },
    /// A service unit's boot and runtime flags
    Service { enabled: bool, active: bool },
    /// Whether a command's guard already holds
    Command { satisfied: bool },
}

impl ProbedState {
    /// State of a file that does not exist.
    pub fn absent_file() -> Self {
        Self::File {
            content: None,
            mode: None,
        }
    }

    /// Short human-readable form for reports and logs.
    pub fn summary(&self) -> String {
        match self {
            Self::File { content: None, .. } => "absent".to_string(),
            Self::File {
                content: Some(bytes),
                mode,
            } => format!(
                "{} bytes, blake3 {}, mode {}",
                bytes.len(),
                &digest(bytes)[..12],
                mode.map(|m| format!("{m:04o}")).unwrap_or_else(|| "?".to_string())
            ),
            Self::Package { version: None } => "not installed".to_string(),
            Self::Package {
                version: Some(version),
            } => format!("installed {version}"),
            Self::Service { enabled, active } => format!(
                "{}, {}",
                if *enabled { "enabled" } else { "disabled" },
                if *active { "running" } else { "stopped" }
            ),
            Self::Command { satisfied: true } => "guard satisfied".to_string(),
            Self::Command { satisfied: false } => "guard not satisfied".to_string(),
        }
    }
}

/// Hex blake3 digest of some content.
pub fn digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Before/after text of a content change, for diff display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDiff {
    pub path: String,
    pub before: String,
    pub after: String,
}

/// Outcome of reconciling one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResult {
    /// Whether the host differs (or would differ, in check mode) afterwards
    pub changed: bool,
    /// Human-readable description of each change step
    pub changes: Vec<String>,
    /// Content change, when the resource manages file content
    pub diff: Option<ContentDiff>,
    /// What went wrong, if anything
    pub error: Option<Error>,
}

impl ReconcileResult {
    /// Already converged.
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Failed before changing anything.
    pub fn failed(error: Error) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_check_flag() {
        assert_eq!(Mode::from_check_flag(true), Mode::Check);
        assert_eq!(Mode::from_check_flag(false), Mode::Apply);
        assert!(Mode::Check.is_check());
    }

    #[test]
    fn test_probed_state_summary() {
        let state = ProbedState::File {
            content: Some(b"abc".to_vec()),
            mode: Some(0o644),
        };
        let summary = state.summary();
        assert!(summary.starts_with("3 bytes, blake3 "));
        assert!(summary.ends_with("mode 0644"));
        assert_eq!(ProbedState::absent_file().summary(), "absent");
        assert_eq!(
            ProbedState::Service {
                enabled: true,
                active: false
            }
            .summary(),
            "enabled, stopped"
        );
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(digest(b"x"), digest(b"x"));
        assert_ne!(digest(b"x"), digest(b"y"));
    }
}
