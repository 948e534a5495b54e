// src/models/run.rs

//! Run records and the aggregated result of a run.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ChangeNotice, ItemOutcome, SnapshotId};

/// Identifier of a run.
pub type RunId = u64;

/// Lifecycle state of a run. `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => f.write_str("running"),
            RunStatus::Success => f.write_str("success"),
            RunStatus::Failed => f.write_str("failed"),
        }
    }
}

/// One extraction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,

    /// Profile name the run was requested for
    pub source_id: String,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub error_summary: Option<String>,

    #[serde(default)]
    pub details: RunDetails,
}

impl Run {
    /// A fresh run in the `running` state.
    pub fn started(id: RunId, source_id: impl Into<String>) -> Self {
        Self {
            id,
            source_id: source_id.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error_summary: None,
            details: RunDetails::default(),
        }
    }
}

/// Proof that the checkpoint marker was present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointProof {
    pub selector: String,
    pub count: usize,
    #[serde(default)]
    pub min_count: Option<usize>,
    pub url: String,
    pub excerpt: String,
}

/// Sample recorded when the page-level money fallback had to be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedSample {
    pub url: String,
    pub pattern: String,
    pub matched: String,
}

/// Whether a whole source produced usable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Success,
    Failed,
}

/// Result of processing one source of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: String,
    pub status: SourceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    /// Locations the entry navigation went through
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub items: Vec<ItemOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<DegradedSample>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    pub total_due: Decimal,
    pub processed: usize,
}

impl SourceOutcome {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: SourceStatus::Success,
            final_url: None,
            redirect_chain: Vec::new(),
            error: None,
            excerpt: None,
            items: Vec::new(),
            checkpoint: None,
            degraded: None,
            artifacts: Vec::new(),
            total_due: Decimal::new(0, 2),
            processed: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == SourceStatus::Failed
    }
}

/// Structured payload stored on the run record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_root: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceOutcome>,
    #[serde(default)]
    pub aggregate_total: Decimal,
    #[serde(default)]
    pub snapshot_ids: Vec<SnapshotId>,
    #[serde(default)]
    pub changed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<ChangeNotice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
}

/// Final payload of a run, carried by `run_finished`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub source_id: String,
    pub status: RunStatus,
    pub error_summary: Option<String>,
    pub snapshot_count: usize,
    pub details: RunDetails,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_started_run_is_running() {
        let run = Run::started(7, "tax");
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());
        assert_eq!(serde_json::to_value(&run).unwrap()["status"], "running");
    }

    #[test]
    fn test_new_source_outcome_total_has_two_fraction_digits() {
        let outcome = SourceOutcome::new("https://portal.example.com");
        assert_eq!(outcome.total_due.to_string(), "0.00");
        assert!(!outcome.is_failed());
    }
}
