// src/pipeline/run.rs

//! Run lifecycle: `running -> {success, failed}`.
//!
//! The orchestrator sequences every source of a profile through
//! navigation, pre-steps, checkpoint and pagination, then decides the run
//! status. Snapshots are committed in one batch and only when every source
//! succeeded. Whatever happens inside the pipeline, including a panic, the
//! run is finalized and exactly one `run_finished` event is published.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::{AppError, Result};
use crate::events::{EventHub, RunEmitter};
use crate::models::{
    CheckpointProof, Config, EventKind, PortalProfile, PropertySnapshot, Run, RunDetails, RunId,
    RunResult, RunStatus, SourceOutcome, SourceStatus,
};
use crate::pipeline::ChangeDetector;
use crate::services::{
    ActionRunner, CheckpointValidator, Page, PaginationController, ProgressSink, aggregate_total,
};
use crate::storage::RunStore;
use crate::utils::{EXCERPT_CHARS, excerpt, extract_account_number};

/// Label used for the implicit source of a direct-items-only profile.
const DIRECT_ITEMS_SOURCE: &str = "direct items";

/// Publishes a run's progress and stores its page captures.
struct RunSink {
    emitter: RunEmitter,
    store: Arc<dyn RunStore>,
    capture_artifacts: bool,
}

#[async_trait]
impl ProgressSink for RunSink {
    fn emit(&self, kind: EventKind) {
        self.emitter.emit(kind);
    }

    async fn capture(&self, label: &str, html: &str) -> Option<String> {
        if !self.capture_artifacts {
            return None;
        }
        match self.store.save_artifact(self.emitter.run_id(), label, html).await {
            Ok(path) => {
                self.emit(EventKind::ScreenshotCreated {
                    label: label.to_string(),
                    path: path.clone(),
                });
                Some(path)
            }
            Err(e) => {
                log::warn!("Failed to store capture '{}': {}", label, e);
                None
            }
        }
    }
}

/// Terminal decision of a run that reached the end of the pipeline.
struct Verdict {
    status: RunStatus,
    error_summary: Option<String>,
}

/// Drives runs to a terminal state.
pub struct RunOrchestrator {
    config: Arc<Config>,
    store: Arc<dyn RunStore>,
    hub: Arc<EventHub>,
}

impl RunOrchestrator {
    pub fn new(config: Arc<Config>, store: Arc<dyn RunStore>, hub: Arc<EventHub>) -> Self {
        Self { config, store, hub }
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Create a run in the `running` state and announce it.
    ///
    /// The run id is available to observers before any extraction starts.
    pub async fn launch(&self, source_id: &str) -> Result<Run> {
        let run = self.store.create_run(source_id).await?;
        log::info!("Run {} started for '{}'", run.id, source_id);
        self.hub.publish(
            run.id,
            EventKind::RunStarted {
                source_id: source_id.to_string(),
            },
        );
        Ok(run)
    }

    /// Drive a launched run to a terminal state.
    ///
    /// Never fails: errors and panics of the pipeline become a `failed` run.
    pub async fn execute(&self, run: Run, page: &mut dyn Page) -> RunResult {
        let emitter = self.hub.emitter(run.id);
        let mut details = RunDetails::default();
        let mut snapshot_count = 0;

        let outcome = AssertUnwindSafe(self.drive(
            &run,
            page,
            &emitter,
            &mut details,
            &mut snapshot_count,
        ))
        .catch_unwind()
        .await;

        let verdict = match outcome {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                log::error!("Run {} aborted: {}", run.id, e);
                details.fatal_error = Some(e.to_string());
                Verdict {
                    status: RunStatus::Failed,
                    error_summary: Some(e.to_string()),
                }
            }
            Err(panic) => {
                let message = format!("Run panicked: {}", panic_message(panic.as_ref()));
                log::error!("Run {} aborted: {}", run.id, message);
                details.fatal_error = Some(message.clone());
                Verdict {
                    status: RunStatus::Failed,
                    error_summary: Some(message),
                }
            }
        };

        // A failed run never reports committed snapshots
        if verdict.status == RunStatus::Failed {
            snapshot_count = 0;
            details.snapshot_ids.clear();
        }

        let result = self.finalize(run, verdict, details, snapshot_count).await;
        emitter.emit(EventKind::RunFinished {
            status: result.status,
            result: result.clone(),
        });
        result
    }

    /// Launch and execute a run for `source_id`.
    pub async fn run(&self, source_id: &str, page: &mut dyn Page) -> Result<RunResult> {
        let run = self.launch(source_id).await?;
        Ok(self.execute(run, page).await)
    }

    async fn finalize(
        &self,
        run: Run,
        verdict: Verdict,
        details: RunDetails,
        snapshot_count: usize,
    ) -> RunResult {
        let stored = self
            .store
            .finalize_run(
                run.id,
                verdict.status,
                verdict.error_summary.clone(),
                Some(details.clone()),
            )
            .await;

        match stored {
            Ok(stored) => {
                log::info!("Run {} finished: {}", stored.id, stored.status);
                RunResult {
                    run_id: stored.id,
                    source_id: stored.source_id,
                    status: stored.status,
                    error_summary: stored.error_summary,
                    snapshot_count,
                    details: stored.details,
                }
            }
            Err(e) => {
                log::error!("Failed to finalize run {}: {}", run.id, e);
                RunResult {
                    run_id: run.id,
                    source_id: run.source_id,
                    status: verdict.status,
                    error_summary: verdict.error_summary,
                    snapshot_count,
                    details,
                }
            }
        }
    }

    async fn drive(
        &self,
        run: &Run,
        page: &mut dyn Page,
        emitter: &RunEmitter,
        details: &mut RunDetails,
        snapshot_count: &mut usize,
    ) -> Result<Verdict> {
        let profile = self.config.profile(&run.source_id)?;
        profile.validate()?;
        details.profile = Some(profile.name.clone());
        if self.config.storage.capture_artifacts {
            details.artifacts_root = Some(
                self.config
                    .storage
                    .root_dir
                    .join("artifacts")
                    .join(format!("run_{}", run.id))
                    .display()
                    .to_string(),
            );
        }

        let sink = RunSink {
            emitter: emitter.clone(),
            store: Arc::clone(&self.store),
            capture_artifacts: self.config.storage.capture_artifacts,
        };

        let sources: Vec<Option<&str>> = if profile.sources.is_empty() {
            vec![None]
        } else {
            profile.sources.iter().map(|s| Some(s.as_str())).collect()
        };

        let mut snapshots = Vec::new();
        for (source_index, source) in sources.iter().enumerate() {
            let (outcome, extracted) = self
                .run_source(profile, *source, source_index, page, &sink)
                .await?;
            if !outcome.is_failed() {
                snapshots.extend(extracted);
            }
            details.sources.push(outcome);
        }
        details.aggregate_total = aggregate_total(details.sources.iter().map(|s| &s.total_due));

        let failed = details.sources.iter().filter(|s| s.is_failed()).count();
        if failed > 0 {
            let summary = format!(
                "Run failed: {} of {} source(s) did not return structured table data",
                failed,
                details.sources.len()
            );
            log::warn!("Run {}: {}", run.id, summary);
            return Ok(Verdict {
                status: RunStatus::Failed,
                error_summary: Some(summary),
            });
        }

        self.commit(run.id, snapshots, emitter, details, snapshot_count)
            .await?;
        Ok(Verdict {
            status: RunStatus::Success,
            error_summary: None,
        })
    }

    /// Detect changes, commit the batch, announce both.
    async fn commit(
        &self,
        run_id: RunId,
        snapshots: Vec<PropertySnapshot>,
        emitter: &RunEmitter,
        details: &mut RunDetails,
        snapshot_count: &mut usize,
    ) -> Result<()> {
        let changes = ChangeDetector::new()
            .detect(self.store.as_ref(), &snapshots)
            .await?;

        let count = snapshots.len();
        let ids = self.store.commit_snapshots(run_id, snapshots).await?;
        *snapshot_count = count;
        details.snapshot_ids = ids.clone();
        emitter.emit(EventKind::DbCommitted {
            snapshot_count: count,
            snapshot_ids: ids,
        });

        details.changed = !changes.is_empty();
        for change in &changes {
            emitter.emit(EventKind::ChangeDetected(change.clone()));
        }
        details.changes = changes;
        Ok(())
    }

    /// Process one source. Only configuration errors escape; every other
    /// failure is recorded on the returned outcome.
    async fn run_source(
        &self,
        profile: &PortalProfile,
        source: Option<&str>,
        source_index: usize,
        page: &mut dyn Page,
        sink: &RunSink,
    ) -> Result<(SourceOutcome, Vec<PropertySnapshot>)> {
        let label = source.unwrap_or(DIRECT_ITEMS_SOURCE);
        log::info!("Source {}: {}", source_index + 1, label);
        sink.emit(EventKind::UrlStarted {
            source_url: label.to_string(),
            account_number: source.and_then(extract_account_number),
            source_index,
        });

        let mut controller = PaginationController::new(profile, label);
        let mut redirect_chain = Vec::new();
        let mut checkpoint = None;
        let result: Result<()> = async {
            if let Some(url) = source {
                redirect_chain = self
                    .enter_source(profile, url, source_index, page, sink)
                    .await?;
            }
            checkpoint = self.prepare_source(profile, page, sink).await?;
            controller.run(page, sink).await
        }
        .await;

        let (mut outcome, snapshots) = controller.into_parts();
        outcome.checkpoint = checkpoint;
        outcome.redirect_chain = redirect_chain;
        outcome.final_url = Some(page.current_url());

        match result {
            Ok(()) => Ok((outcome, snapshots)),
            Err(e) if e.is_config() => Err(e),
            Err(e) => {
                self.fail_source(&mut outcome, label, source_index, &e, page, sink)
                    .await;
                Ok((outcome, snapshots))
            }
        }
    }

    /// Navigate, run pre-steps and validate the checkpoint.
    /// Entry navigation of a source, returning the locations it went through.
    async fn enter_source(
        &self,
        profile: &PortalProfile,
        url: &str,
        source_index: usize,
        page: &mut dyn Page,
        sink: &RunSink,
    ) -> Result<Vec<String>> {
        page.goto(url, profile.detail_wait_ms).await?;
        let redirect_chain = page.redirect_chain();
        let final_url = page.current_url();
        let redirected = redirect_chain.len() > 1;
        if redirected {
            log::info!("{} redirected to {}", url, final_url);
        }
        sink.emit(EventKind::UrlRedirectObserved {
            source_url: url.to_string(),
            final_url,
            account_number: extract_account_number(url),
            redirect_chain: redirect_chain.clone(),
            redirected,
            index: source_index,
        });
        Ok(redirect_chain)
    }

    async fn prepare_source(
        &self,
        profile: &PortalProfile,
        page: &mut dyn Page,
        sink: &RunSink,
    ) -> Result<Option<CheckpointProof>> {
        ActionRunner::new(&profile.pre_steps).run(page).await?;

        let proof = CheckpointValidator::from_profile(profile)
            .validate(page)
            .await?;
        if let Some(proof) = &proof {
            sink.emit(EventKind::CheckpointValidated(proof.clone()));
        }
        Ok(proof)
    }

    async fn fail_source(
        &self,
        outcome: &mut SourceOutcome,
        label: &str,
        source_index: usize,
        error: &AppError,
        page: &mut dyn Page,
        sink: &RunSink,
    ) {
        let page_excerpt = excerpt(&page.body_text(), EXCERPT_CHARS);
        log::warn!("Source {} failed: {}", label, error);

        outcome.status = SourceStatus::Failed;
        outcome.error = Some(error.to_string());
        outcome.excerpt = Some(page_excerpt.clone());
        sink.emit(EventKind::UrlFailed {
            source_url: label.to_string(),
            error: error.to_string(),
            excerpt: page_excerpt,
        });

        let capture_label = format!("source {} failure", source_index + 1);
        if let Some(path) = sink.capture(&capture_label, &page.content()).await {
            outcome.artifacts.push(path);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
