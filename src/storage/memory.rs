//! In-memory store for tests and offline replay.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{PropertySnapshot, Run, RunDetails, RunId, RunStatus, SnapshotId};
use crate::storage::{RunStore, newest_first};

#[derive(Default)]
struct State {
    runs: BTreeMap<RunId, Run>,
    snapshots: Vec<PropertySnapshot>,
    artifacts: BTreeMap<String, String>,
    next_run_id: RunId,
    next_snapshot_id: SnapshotId,
}

/// Mutex-guarded maps implementing [`RunStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total number of committed snapshots across all runs.
    pub fn snapshot_count(&self) -> usize {
        self.lock().snapshots.len()
    }

    /// HTML stored under an artifact location.
    pub fn artifact(&self, location: &str) -> Option<String> {
        self.lock().artifacts.get(location).cloned()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, source_id: &str) -> Result<Run> {
        let mut state = self.lock();
        state.next_run_id += 1;
        let run = Run::started(state.next_run_id, source_id);
        state.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn finalize_run(
        &self,
        run_id: RunId,
        status: RunStatus,
        error_summary: Option<String>,
        details: Option<RunDetails>,
    ) -> Result<Run> {
        if !status.is_terminal() {
            return Err(AppError::validation(format!(
                "run {run_id} cannot be finalized as {status}"
            )));
        }
        let mut state = self.lock();
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| AppError::storage(format!("run {run_id} not found")))?;
        if run.status.is_terminal() {
            return Err(AppError::validation(format!(
                "run {run_id} is already {}",
                run.status
            )));
        }
        run.status = status;
        run.finished_at = Some(Utc::now());
        run.error_summary = error_summary;
        if let Some(details) = details {
            run.details = details;
        }
        Ok(run.clone())
    }

    async fn commit_snapshots(
        &self,
        run_id: RunId,
        snapshots: Vec<PropertySnapshot>,
    ) -> Result<Vec<SnapshotId>> {
        let mut state = self.lock();
        match state.runs.get(&run_id) {
            None => return Err(AppError::storage(format!("run {run_id} not found"))),
            Some(run) if run.status.is_terminal() => {
                return Err(AppError::validation(format!(
                    "run {run_id} is already {}",
                    run.status
                )));
            }
            Some(_) => {}
        }

        let mut ids = Vec::with_capacity(snapshots.len());
        for mut snapshot in snapshots {
            state.next_snapshot_id += 1;
            snapshot.id = Some(state.next_snapshot_id);
            snapshot.run_id = Some(run_id);
            ids.push(state.next_snapshot_id);
            state.snapshots.push(snapshot);
        }
        Ok(ids)
    }

    async fn most_recent_prior_snapshot(&self, identity: &str) -> Result<Option<PropertySnapshot>> {
        Ok(self.property_history(identity, 1).await?.into_iter().next())
    }

    async fn save_artifact(&self, run_id: RunId, label: &str, html: &str) -> Result<String> {
        let mut state = self.lock();
        let location = format!(
            "memory://run_{run_id}/{:02}_{}",
            state.artifacts.len() + 1,
            crate::utils::slugify(label)
        );
        state.artifacts.insert(location.clone(), html.to_string());
        Ok(location)
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<Run>> {
        Ok(self.lock().runs.get(&run_id).cloned())
    }

    async fn list_runs(&self, source_id: &str, limit: usize) -> Result<Vec<Run>> {
        Ok(self
            .lock()
            .runs
            .values()
            .rev()
            .filter(|run| run.source_id == source_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn snapshots_for_run(&self, run_id: RunId) -> Result<Vec<PropertySnapshot>> {
        Ok(self
            .lock()
            .snapshots
            .iter()
            .filter(|s| s.run_id == Some(run_id))
            .cloned()
            .collect())
    }

    async fn property_history(&self, identity: &str, limit: usize) -> Result<Vec<PropertySnapshot>> {
        let mut matches: Vec<PropertySnapshot> = self
            .lock()
            .snapshots
            .iter()
            .filter(|s| s.identity() == identity)
            .cloned()
            .collect();
        matches.sort_by(newest_first);
        matches.truncate(limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::models::PaidStatus;

    pub(crate) fn snapshot(address: &str, cents: i64) -> PropertySnapshot {
        PropertySnapshot {
            id: None,
            run_id: None,
            source_reference: format!("https://portal.example.com/{address}"),
            account_number: None,
            final_url: format!("https://portal.example.com/{address}"),
            redirect_chain: Vec::new(),
            address: address.to_string(),
            total_due: Decimal::new(cents, 2),
            paid_status: PaidStatus::from_total(Decimal::new(cents, 2)),
            due_date: None,
            property_number: None,
            tax_map: None,
            raw_tables: Vec::new(),
            degraded: false,
            captured_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let store = MemoryStore::new();
        let run = store.create_run("tax").await.unwrap();
        assert_eq!(run.status, RunStatus::Running);

        let ids = store
            .commit_snapshots(run.id, vec![snapshot("1 MAIN", 100), snapshot("2 MAIN", 0)])
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2]);

        let done = store
            .finalize_run(run.id, RunStatus::Success, None, None)
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Success);
        assert!(done.finished_at.is_some());
        assert_eq!(store.snapshots_for_run(run.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_terminal_runs_are_immutable() {
        let store = MemoryStore::new();
        let run = store.create_run("tax").await.unwrap();
        assert!(store
            .finalize_run(run.id, RunStatus::Running, None, None)
            .await
            .is_err());
        store
            .finalize_run(run.id, RunStatus::Failed, Some("boom".into()), None)
            .await
            .unwrap();
        assert!(store
            .finalize_run(run.id, RunStatus::Success, None, None)
            .await
            .is_err());
        assert!(store
            .commit_snapshots(run.id, vec![snapshot("1 MAIN", 1)])
            .await
            .is_err());
        assert_eq!(store.snapshot_count(), 0);
    }

    #[tokio::test]
    async fn test_history_and_prior_snapshot() {
        let store = MemoryStore::new();
        let first = store.create_run("tax").await.unwrap();
        store
            .commit_snapshots(first.id, vec![snapshot("1 MAIN", 100)])
            .await
            .unwrap();
        let second = store.create_run("tax").await.unwrap();
        store
            .commit_snapshots(second.id, vec![snapshot("1 MAIN", 250)])
            .await
            .unwrap();

        let prior = store.most_recent_prior_snapshot("1 MAIN").await.unwrap().unwrap();
        assert_eq!(prior.run_id, Some(second.id));
        assert_eq!(store.property_history("1 MAIN", 10).await.unwrap().len(), 2);
        assert!(store.most_recent_prior_snapshot("9 ELM").await.unwrap().is_none());

        let runs = store.list_runs("tax", 1).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, second.id);
    }

    #[tokio::test]
    async fn test_artifacts() {
        let store = MemoryStore::new();
        let location = store.save_artifact(4, "item 1 MAIN", "<p>x</p>").await.unwrap();
        assert_eq!(location, "memory://run_4/01_item-1-main");
        assert_eq!(store.artifact(&location).as_deref(), Some("<p>x</p>"));
    }
}
