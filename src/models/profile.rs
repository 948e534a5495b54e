// src/models/profile.rs

//! Portal profiles: how to drive one tax portal.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Step;

/// Selector treated as "generic" for detail tables.
pub const GENERIC_TABLE_SELECTOR: &str = "table";

/// Description of how to drive a single source portal.
///
/// Supplied once per run and never mutated while the run executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalProfile {
    /// Profile name; runs are requested by this name
    pub name: String,

    /// Entry URLs. Each one is an independent source of the run.
    #[serde(default)]
    pub sources: Vec<String>,

    /// Selector for each row of the results listing
    #[serde(default = "defaults::results_row_selector")]
    pub results_row_selector: String,

    /// Selector for the detail link inside a results row
    #[serde(default = "defaults::row_first_link_selector")]
    pub row_first_link_selector: String,

    /// Selector for the tables on a detail page
    #[serde(default = "defaults::detail_table_selector")]
    pub detail_table_selector: String,

    /// Selector for the container holding the results listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_container_selector: Option<String>,

    /// Marker that must be present before extraction starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_selector: Option<String>,

    /// Minimum number of checkpoint matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_min_count: Option<usize>,

    /// Bounded wait for the checkpoint marker
    #[serde(default = "defaults::checkpoint_timeout_ms")]
    pub checkpoint_timeout_ms: u64,

    /// Steps executed after navigating to a source
    #[serde(default)]
    pub pre_steps: Vec<Step>,

    /// Direct item URLs; when present the listing is not used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_item_urls: Option<Vec<String>>,

    /// Maximum number of extracted items per source (0 = unbounded)
    #[serde(default)]
    pub max_items: i64,

    /// Page-level money pattern used when no item could be extracted
    #[serde(default = "defaults::money_fallback_pattern")]
    pub money_fallback_pattern: String,

    /// Explicit selector for a "back to results" control
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_control_selector: Option<String>,

    /// Texts identifying a "back to results" control
    #[serde(default = "defaults::back_control_texts")]
    pub back_control_texts: Vec<String>,

    /// Timeout for navigation and for each detail-view transition phase
    #[serde(default = "defaults::detail_wait_ms")]
    pub detail_wait_ms: u64,
}

impl PortalProfile {
    /// Create a profile with default selectors.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
            results_row_selector: defaults::results_row_selector(),
            row_first_link_selector: defaults::row_first_link_selector(),
            detail_table_selector: defaults::detail_table_selector(),
            results_container_selector: None,
            checkpoint_selector: None,
            checkpoint_min_count: None,
            checkpoint_timeout_ms: defaults::checkpoint_timeout_ms(),
            pre_steps: Vec::new(),
            direct_item_urls: None,
            max_items: 0,
            money_fallback_pattern: defaults::money_fallback_pattern(),
            back_control_selector: None,
            back_control_texts: defaults::back_control_texts(),
            detail_wait_ms: defaults::detail_wait_ms(),
        }
    }

    /// Direct item URLs, if direct-items mode is configured.
    pub fn direct_items(&self) -> Option<&[String]> {
        self.direct_item_urls
            .as_deref()
            .filter(|items| !items.is_empty())
    }

    /// Item cap, `None` when unbounded.
    pub fn item_cap(&self) -> Option<usize> {
        usize::try_from(self.max_items).ok().filter(|cap| *cap > 0)
    }

    /// Whether the detail table selector is anything but the generic default.
    pub fn has_specific_table_selector(&self) -> bool {
        self.detail_table_selector.trim() != GENERIC_TABLE_SELECTOR
    }

    /// Validate profile values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("profile name is empty"));
        }
        if self.sources.is_empty() && self.direct_items().is_none() {
            return Err(AppError::validation(format!(
                "profile '{}' has neither sources nor direct_item_urls",
                self.name
            )));
        }
        for (label, selector) in [
            ("results_row_selector", &self.results_row_selector),
            ("row_first_link_selector", &self.row_first_link_selector),
            ("detail_table_selector", &self.detail_table_selector),
        ] {
            if selector.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "profile '{}': {label} is empty",
                    self.name
                )));
            }
        }
        if self.checkpoint_min_count.is_some() && self.checkpoint_selector.is_none() {
            return Err(AppError::validation(format!(
                "profile '{}': checkpoint_min_count set without checkpoint_selector",
                self.name
            )));
        }
        regex::Regex::new(&self.money_fallback_pattern).map_err(|e| {
            AppError::config(format!(
                "profile '{}': invalid money_fallback_pattern: {e}",
                self.name
            ))
        })?;
        Ok(())
    }
}

pub(crate) mod defaults {
    pub fn results_row_selector() -> String {
        "table tbody tr".into()
    }
    pub fn row_first_link_selector() -> String {
        "a[href]".into()
    }
    pub fn detail_table_selector() -> String {
        super::GENERIC_TABLE_SELECTOR.into()
    }
    pub fn checkpoint_timeout_ms() -> u64 {
        15_000
    }
    pub fn detail_wait_ms() -> u64 {
        10_000
    }
    pub fn money_fallback_pattern() -> String {
        r"\$\s*((?:[0-9]{1,3}(?:,[0-9]{3})+|[0-9]+)(?:\.[0-9]{2})?)".into()
    }
    pub fn back_control_texts() -> Vec<String> {
        vec![
            "back to results".into(),
            "return to results".into(),
            "back to search".into(),
            "search results".into(),
        ]
    }
}
