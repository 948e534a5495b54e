// src/services/checkpoint.rs

//! Checkpoint validation before extraction starts.

use crate::error::{AppError, Result};
use crate::models::{CheckpointProof, PortalProfile};
use crate::services::page::{Page, WaitCondition};
use crate::utils::{EXCERPT_CHARS, excerpt};

/// Asserts that a configured marker is present on the page.
pub struct CheckpointValidator<'a> {
    selector: Option<&'a str>,
    min_count: Option<usize>,
    timeout_ms: u64,
}

impl<'a> CheckpointValidator<'a> {
    pub fn new(selector: Option<&'a str>, min_count: Option<usize>, timeout_ms: u64) -> Self {
        Self {
            selector,
            min_count,
            timeout_ms,
        }
    }

    pub fn from_profile(profile: &'a PortalProfile) -> Self {
        Self::new(
            profile.checkpoint_selector.as_deref(),
            profile.checkpoint_min_count,
            profile.checkpoint_timeout_ms,
        )
    }

    /// Returns `None` when no checkpoint is configured.
    pub async fn validate(&self, page: &mut dyn Page) -> Result<Option<CheckpointProof>> {
        let Some(selector) = self.selector else {
            return Ok(None);
        };

        page.wait_for(&WaitCondition::Selector(selector.to_string()), self.timeout_ms)
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::checkpoint(format!(
                        "marker '{selector}' not found within {}ms",
                        self.timeout_ms
                    ))
                } else {
                    e
                }
            })?;

        let count = page.count(selector)?;
        if let Some(min) = self.min_count {
            if count < min {
                return Err(AppError::checkpoint(format!(
                    "marker '{selector}' matched {count} element(s), at least {min} required"
                )));
            }
        }

        let proof = CheckpointProof {
            selector: selector.to_string(),
            count,
            min_count: self.min_count,
            url: page.current_url(),
            excerpt: excerpt(&page.body_text(), EXCERPT_CHARS),
        };
        log::debug!("Checkpoint '{}' matched {} element(s)", selector, count);
        Ok(Some(proof))
    }
}
