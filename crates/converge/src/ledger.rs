//! Change ledger - append-only record of one run's outcomes

use crate::error::Error;
use crate::types::{ContentDiff, ReconcileResult};
use serde::{Deserialize, Serialize};

/// Outcome of one resource in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Declaration id
    pub resource: String,
    /// Kind tag, e.g. `"file"`
    pub kind: String,
    pub changed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<ContentDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

impl ChangeRecord {
    pub fn from_result(resource: &str, kind: &str, result: ReconcileResult) -> Self {
        Self {
            resource: resource.to_string(),
            kind: kind.to_string(),
            changed: result.changed,
            changes: result.changes,
            diff: result.diff,
            error: result.error,
        }
    }

    /// A resource that failed before reconciliation (probe, prerequisite).
    pub fn failed(resource: &str, kind: &str, error: Error) -> Self {
        Self::from_result(resource, kind, ReconcileResult::failed(error))
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Counts over a ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub changed: usize,
    pub failed: usize,
}

impl LedgerSummary {
    /// Resources that needed nothing
    pub fn unchanged(&self) -> usize {
        self.total.saturating_sub(self.changed + self.failed)
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &LedgerSummary) {
        self.total += other.total;
        self.changed += other.changed;
        self.failed += other.failed;
    }
}

/// Append-only list of change records; past entries are never touched.
#[derive(Debug, Default)]
pub struct ChangeLedger {
    records: Vec<ChangeRecord>,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: ChangeRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    /// Latest record for a resource id
    pub fn get(&self, resource: &str) -> Option<&ChangeRecord> {
        self.records.iter().rev().find(|r| r.resource == resource)
    }

    /// Whether `resource` has been recorded without an error
    pub fn succeeded(&self, resource: &str) -> bool {
        self.get(resource).is_some_and(ChangeRecord::is_success)
    }

    /// A resource that changed counts as changed even if a later step
    /// failed; it is then also counted as failed.
    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            total: self.records.len(),
            changed: self.records.iter().filter(|r| r.changed).count(),
            failed: self.records.iter().filter(|r| !r.is_success()).count(),
        }
    }

    pub fn into_records(self) -> Vec<ChangeRecord> {
        self.records
    }
}
