// src/models/mod.rs

//! Domain models for the extraction pipeline.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod event;
mod profile;
mod run;
mod snapshot;
mod step;

// Re-export all public types
pub use config::{Config, EventsConfig, HttpConfig, LoggingConfig, StorageConfig};
pub use event::{EventKind, RunEvent};
pub use profile::{GENERIC_TABLE_SELECTOR, PortalProfile};
pub use run::{
    CheckpointProof, DegradedSample, Run, RunDetails, RunId, RunResult, RunStatus,
    SourceOutcome, SourceStatus,
};
pub use snapshot::{
    ChangeNotice, ItemOutcome, ItemStatus, PaidStatus, PropertyIdentity, PropertySnapshot, Row,
    SnapshotId, Table,
};
pub use step::{RawStep, Step, StepAction, SUPPORTED_ACTIONS, Target};
