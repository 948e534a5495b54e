//! Pipeline entry points for extraction runs.
//!
//! - `RunOrchestrator`: drives a run from `running` to a terminal state
//! - `ChangeDetector`: compares new snapshots with stored history

pub mod diff;
pub mod run;

pub use diff::ChangeDetector;
pub use run::RunOrchestrator;
