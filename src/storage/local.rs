//! Local filesystem storage implementation.
//!
//! Run records live in `runs/<id>.json`, committed snapshots in a single
//! `snapshots.json`, HTML captures under `artifacts/run_<id>/`. Every file
//! is replaced atomically, and writers are serialized through one lock so
//! read-modify-write cycles on `snapshots.json` never interleave.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{PropertySnapshot, Run, RunDetails, RunId, RunStatus, SnapshotId};
use crate::storage::{RunStore, newest_first};
use crate::utils::slugify;

const RUNS_DIR: &str = "runs";
const SNAPSHOTS_KEY: &str = "snapshots.json";
const ARTIFACTS_DIR: &str = "artifacts";

/// Local filesystem storage backend.
pub struct LocalStorage {
    root_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    fn run_key(run_id: RunId) -> String {
        format!("{RUNS_DIR}/{run_id}.json")
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn read_snapshots(&self) -> Result<Vec<PropertySnapshot>> {
        Ok(self.read_json(SNAPSHOTS_KEY).await?.unwrap_or_default())
    }

    async fn read_run(&self, run_id: RunId) -> Result<Run> {
        self.read_json(&Self::run_key(run_id))
            .await?
            .ok_or_else(|| AppError::storage(format!("run {run_id} not found")))
    }

    /// Ids of every stored run, ascending.
    async fn run_ids(&self) -> Result<Vec<RunId>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.path(RUNS_DIR)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(AppError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let id = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<RunId>().ok());
            if let Some(id) = id {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    async fn count_files(&self, dir: &Path) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AppError::Io(e)),
        };
        let mut count = 0;
        while entries.next_entry().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl RunStore for LocalStorage {
    async fn create_run(&self, source_id: &str) -> Result<Run> {
        let _guard = self.write_lock.lock().await;
        let id = self.run_ids().await?.last().copied().unwrap_or(0) + 1;
        let run = Run::started(id, source_id);
        self.write_json(&Self::run_key(id), &run).await?;
        log::debug!("Created run {} for '{}'", id, source_id);
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
        let _guard = self.write_lock.lock().await;
        let mut run = self.read_run(run_id).await?;
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
        self.write_json(&Self::run_key(run_id), &run).await?;
        Ok(run)
    }

    async fn commit_snapshots(
        &self,
        run_id: RunId,
        snapshots: Vec<PropertySnapshot>,
    ) -> Result<Vec<SnapshotId>> {
        let _guard = self.write_lock.lock().await;
        let run = self.read_run(run_id).await?;
        if run.status.is_terminal() {
            return Err(AppError::validation(format!(
                "run {run_id} is already {}",
                run.status
            )));
        }

        let mut stored = self.read_snapshots().await?;
        let mut next_id = stored.iter().filter_map(|s| s.id).max().unwrap_or(0);
        let mut ids = Vec::with_capacity(snapshots.len());
        for mut snapshot in snapshots {
            next_id += 1;
            snapshot.id = Some(next_id);
            snapshot.run_id = Some(run_id);
            ids.push(next_id);
            stored.push(snapshot);
        }

        // Single file replace: the batch lands together or not at all
        self.write_json(SNAPSHOTS_KEY, &stored).await?;
        log::info!("Committed {} snapshot(s) for run {}", ids.len(), run_id);
        Ok(ids)
    }

    async fn most_recent_prior_snapshot(&self, identity: &str) -> Result<Option<PropertySnapshot>> {
        Ok(self.property_history(identity, 1).await?.into_iter().next())
    }

    async fn save_artifact(&self, run_id: RunId, label: &str, html: &str) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let dir = format!("{ARTIFACTS_DIR}/run_{run_id}");
        let seq = self.count_files(&self.path(&dir)).await? + 1;
        let key = format!("{dir}/{seq:02}_{}.html", slugify(label));
        self.write_bytes(&key, html.as_bytes()).await?;
        Ok(self.path(&key).display().to_string())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<Run>> {
        self.read_json(&Self::run_key(run_id)).await
    }

    async fn list_runs(&self, source_id: &str, limit: usize) -> Result<Vec<Run>> {
        let mut runs = Vec::new();
        for id in self.run_ids().await?.into_iter().rev() {
            if runs.len() >= limit {
                break;
            }
            if let Some(run) = self.get_run(id).await? {
                if run.source_id == source_id {
                    runs.push(run);
                }
            }
        }
        Ok(runs)
    }

    async fn snapshots_for_run(&self, run_id: RunId) -> Result<Vec<PropertySnapshot>> {
        Ok(self
            .read_snapshots()
            .await?
            .into_iter()
            .filter(|s| s.run_id == Some(run_id))
            .collect())
    }

    async fn property_history(&self, identity: &str, limit: usize) -> Result<Vec<PropertySnapshot>> {
        let mut matches: Vec<PropertySnapshot> = self
            .read_snapshots()
            .await?
            .into_iter()
            .filter(|s| s.identity() == identity)
            .collect();
        matches.sort_by(newest_first);
        matches.truncate(limit);
        Ok(matches)
    }
}
