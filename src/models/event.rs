// src/models/event.rs

//! Progress events published while a run is in flight.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ChangeNotice, CheckpointProof, RunId, RunResult, RunStatus, SnapshotId};

/// An event as observed by subscribers: `{type, run_id, timestamp, ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl RunEvent {
    pub fn new(run_id: RunId, kind: EventKind) -> Self {
        Self {
            run_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// The fixed event vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        source_id: String,
    },
    UrlStarted {
        source_url: String,
        account_number: Option<String>,
        source_index: usize,
    },
    /// Where a navigation to a source or direct item ended up
    UrlRedirectObserved {
        source_url: String,
        final_url: String,
        account_number: Option<String>,
        redirect_chain: Vec<String>,
        redirected: bool,
        index: usize,
    },
    UrlFailed {
        source_url: String,
        error: String,
        excerpt: String,
    },
    ItemStarted {
        reference: String,
        item_index: usize,
    },
    ResultsLocatorResolved {
        configured_row_selector: String,
        configured_link_selector: String,
        row_selector: String,
        link_selector: String,
    },
    CheckpointValidated(CheckpointProof),
    PropertyScraped {
        reference: String,
        address: String,
        total_due: Decimal,
        item_index: usize,
    },
    PropertyRowSkipped {
        reason: String,
        property_label: String,
        item_index: usize,
    },
    ScreenshotCreated {
        label: String,
        path: String,
    },
    DbCommitted {
        snapshot_count: usize,
        snapshot_ids: Vec<SnapshotId>,
    },
    ChangeDetected(ChangeNotice),
    RunFinished {
        status: RunStatus,
        result: RunResult,
    },
}

impl EventKind {
    /// Wire name of the event type.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::RunStarted { .. } => "run_started",
            EventKind::UrlStarted { .. } => "url_started",
            EventKind::UrlRedirectObserved { .. } => "url_redirect_observed",
            EventKind::UrlFailed { .. } => "url_failed",
            EventKind::ItemStarted { .. } => "item_started",
            EventKind::ResultsLocatorResolved { .. } => "results_locator_resolved",
            EventKind::CheckpointValidated(_) => "checkpoint_validated",
            EventKind::PropertyScraped { .. } => "property_scraped",
            EventKind::PropertyRowSkipped { .. } => "property_row_skipped",
            EventKind::ScreenshotCreated { .. } => "screenshot_created",
            EventKind::DbCommitted { .. } => "db_committed",
            EventKind::ChangeDetected(_) => "change_detected",
            EventKind::RunFinished { .. } => "run_finished",
        }
    }

    /// `run_finished` closes the stream of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::RunFinished { .. })
    }
}
