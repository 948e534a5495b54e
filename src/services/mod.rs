//! Service layer for the extraction pipeline.
//!
//! This module contains the business logic for:
//! - Page sessions over HTTP (`HttpSession`, `Fetcher`)
//! - Scripted pre-navigation steps (`ActionRunner`)
//! - Checkpoint marker validation (`CheckpointValidator`)
//! - Listing/detail traversal and extraction (`PaginationController`)
//! - Table extraction and money/address parsing (`tables`, `parser`)

mod actions;
mod checkpoint;
pub mod document;
pub mod fetch;
pub mod page;
mod paginator;
pub mod parser;
pub mod session;
pub mod tables;

use scraper::Selector;

use crate::error::{AppError, Result};

pub use actions::ActionRunner;
pub use checkpoint::CheckpointValidator;
pub use fetch::{FetchRequest, FetchResponse, Fetcher, MemoryFetcher, Method, ReqwestFetcher};
pub use page::{Page, WaitCondition};
pub use paginator::{
    FALLBACK_LOCATORS, Locators, PaginationController, ProgressSink, aggregate_total,
};
pub use session::HttpSession;
pub use tables::extract_tables;

/// Parse a CSS selector, mapping failures to a configuration error.
pub fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| AppError::selector(selector, format!("{e:?}")))
}
