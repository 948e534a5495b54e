// src/services/actions.rs

//! Runs scripted pre-navigation steps against a page.

use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::{Step, StepAction};
use crate::services::page::{Page, WaitCondition};

/// Executes a profile's pre-steps in order.
///
/// The first failing step aborts the sequence with an error naming the
/// step's 1-based index and action.
pub struct ActionRunner<'a> {
    steps: &'a [Step],
}

impl<'a> ActionRunner<'a> {
    pub fn new(steps: &'a [Step]) -> Self {
        Self { steps }
    }

    pub async fn run(&self, page: &mut dyn Page) -> Result<()> {
        for (idx, step) in self.steps.iter().enumerate() {
            let index = idx + 1;
            let action = step.action.name();
            log::debug!("Step {} ({}) on {}", index, action, page.current_url());

            Self::execute(step, page)
                .await
                .map_err(|e| AppError::step(index, action, e))?;
        }
        Ok(())
    }

    async fn execute(step: &Step, page: &mut dyn Page) -> Result<()> {
        let timeout_ms = step.timeout_ms();
        match &step.action {
            StepAction::Click(target) => page.click(target, timeout_ms).await,
            StepAction::Check(target) => page.check(target, timeout_ms).await,
            StepAction::Fill { target, value } => page.fill(target, value, timeout_ms).await,
            StepAction::WaitForSelector(target) => {
                page.wait_for(&WaitCondition::from(target), timeout_ms).await
            }
            StepAction::WaitForUrl(fragment) => {
                page.wait_for(&WaitCondition::UrlMatches(fragment.clone()), timeout_ms)
                    .await
            }
            StepAction::WaitForTimeout(ms) => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(())
            }
        }
    }
}
