//! Persistence of runs, snapshots and page captures.
//!
//! ## Directory Structure (`LocalStorage`)
//!
//! ```text
//! storage/
//! ├── config.toml           # Portal profiles and settings
//! ├── runs/
//! │   └── 1.json            # One record per run
//! ├── snapshots.json        # Committed snapshots, all runs
//! └── artifacts/
//!     └── run_1/
//!         └── 01_item-1-104-mooney-ave.html
//! ```

pub mod local;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{PropertySnapshot, Run, RunDetails, RunId, RunStatus, SnapshotId};

// Re-export for convenience
pub use local::LocalStorage;
pub use memory::MemoryStore;

/// Persistence contract of the run orchestrator.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a run in the `running` state.
    async fn create_run(&self, source_id: &str) -> Result<Run>;

    /// Move a running run to a terminal state.
    ///
    /// Rejects non-terminal target states and runs that are already terminal.
    async fn finalize_run(
        &self,
        run_id: RunId,
        status: RunStatus,
        error_summary: Option<String>,
        details: Option<RunDetails>,
    ) -> Result<Run>;

    /// Persist a run's snapshots in one batch; either all are stored or none.
    async fn commit_snapshots(
        &self,
        run_id: RunId,
        snapshots: Vec<PropertySnapshot>,
    ) -> Result<Vec<SnapshotId>>;

    /// Latest committed snapshot with the given identity.
    async fn most_recent_prior_snapshot(&self, identity: &str) -> Result<Option<PropertySnapshot>>;

    /// Store an HTML capture for a run, returning its location.
    async fn save_artifact(&self, run_id: RunId, label: &str, html: &str) -> Result<String>;

    async fn get_run(&self, run_id: RunId) -> Result<Option<Run>>;

    /// Most recent runs of a source, newest first.
    async fn list_runs(&self, source_id: &str, limit: usize) -> Result<Vec<Run>>;

    async fn snapshots_for_run(&self, run_id: RunId) -> Result<Vec<PropertySnapshot>>;

    /// Snapshots sharing an identity, newest first.
    async fn property_history(&self, identity: &str, limit: usize) -> Result<Vec<PropertySnapshot>>;
}

/// Newest-first ordering shared by the store implementations.
pub(crate) fn newest_first(a: &PropertySnapshot, b: &PropertySnapshot) -> std::cmp::Ordering {
    b.captured_at
        .cmp(&a.captured_at)
        .then_with(|| b.id.cmp(&a.id))
}
