// src/models/step.rs

//! Scripted pre-navigation steps.
//!
//! Steps arrive as loosely shaped descriptors (`{action, selector|text,
//! value?, timeout_ms?, url?, ms?}`) and are parsed into a closed set of
//! actions when the configuration is loaded. Unknown actions never reach
//! the runner.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Action names accepted in step descriptors.
pub const SUPPORTED_ACTIONS: &[&str] = &[
    "click",
    "check",
    "fill",
    "wait_for_selector",
    "wait_for_url",
    "wait_for_timeout",
];

/// Default per-step timeout in milliseconds.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 10_000;

/// Default delay for `wait_for_timeout` in milliseconds.
pub const DEFAULT_WAIT_MS: u64 = 1_000;

/// How a step locates its element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// CSS selector, used verbatim
    Selector(String),

    /// First element whose rendered text loosely matches
    Text(String),

    /// First match of `selector` inside the `index`-th match of `container`
    Within {
        container: String,
        index: usize,
        selector: String,
    },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Selector(s) => write!(f, "selector '{s}'"),
            Target::Text(t) => write!(f, "text '{t}'"),
            Target::Within {
                container,
                index,
                selector,
            } => write!(f, "'{selector}' within '{container}'[{index}]"),
        }
    }
}

/// The closed set of step actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Click(Target),
    Check(Target),
    Fill { target: Target, value: String },
    WaitForSelector(Target),
    WaitForUrl(String),
    WaitForTimeout(u64),
}

impl StepAction {
    /// Descriptor name of this action.
    pub fn name(&self) -> &'static str {
        match self {
            StepAction::Click(_) => "click",
            StepAction::Check(_) => "check",
            StepAction::Fill { .. } => "fill",
            StepAction::WaitForSelector(_) => "wait_for_selector",
            StepAction::WaitForUrl(_) => "wait_for_url",
            StepAction::WaitForTimeout(_) => "wait_for_timeout",
        }
    }
}

/// Step descriptor exactly as written in the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStep {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ms: Option<u64>,
}

/// A validated step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct Step {
    pub action: StepAction,
    timeout_ms: Option<u64>,
}

impl Step {
    pub fn new(action: StepAction) -> Self {
        Self {
            action,
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Effective timeout for this step.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(DEFAULT_STEP_TIMEOUT_MS)
    }
}

impl RawStep {
    fn target(&self) -> Result<Target, AppError> {
        match (&self.selector, &self.text) {
            (Some(selector), _) if !selector.trim().is_empty() => {
                Ok(Target::Selector(selector.clone()))
            }
            (_, Some(text)) if !text.trim().is_empty() => Ok(Target::Text(text.clone())),
            _ => Err(AppError::config(format!(
                "step '{}' requires a 'selector' or 'text'",
                self.action
            ))),
        }
    }
}

impl TryFrom<RawStep> for Step {
    type Error = AppError;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let action = match raw.action.trim() {
            "click" => StepAction::Click(raw.target()?),
            "check" => StepAction::Check(raw.target()?),
            "fill" => {
                let value = raw
                    .value
                    .clone()
                    .ok_or_else(|| AppError::config("step 'fill' requires a 'value'"))?;
                StepAction::Fill {
                    target: raw.target()?,
                    value,
                }
            }
            "wait_for_selector" => StepAction::WaitForSelector(raw.target()?),
            "wait_for_url" => {
                let url = raw
                    .url
                    .clone()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| AppError::config("step 'wait_for_url' requires a 'url'"))?;
                StepAction::WaitForUrl(url)
            }
            "wait_for_timeout" => {
                StepAction::WaitForTimeout(raw.ms.or(raw.timeout_ms).unwrap_or(DEFAULT_WAIT_MS))
            }
            other => {
                return Err(AppError::config(format!(
                    "unsupported step action '{other}' (supported: {})",
                    SUPPORTED_ACTIONS.join(", ")
                )));
            }
        };

        Ok(Step {
            action,
            timeout_ms: raw.timeout_ms,
        })
    }
}

impl From<Step> for RawStep {
    fn from(step: Step) -> Self {
        let mut raw = RawStep {
            action: step.action.name().to_string(),
            timeout_ms: step.timeout_ms,
            ..RawStep::default()
        };
        let set_target = |raw: &mut RawStep, target: Target| match target {
            Target::Selector(s) => raw.selector = Some(s),
            Target::Text(t) => raw.text = Some(t),
            Target::Within { selector, .. } => raw.selector = Some(selector),
        };
        match step.action {
            StepAction::Click(t) | StepAction::Check(t) | StepAction::WaitForSelector(t) => {
                set_target(&mut raw, t)
            }
            StepAction::Fill { target, value } => {
                set_target(&mut raw, target);
                raw.value = Some(value);
            }
            StepAction::WaitForUrl(url) => raw.url = Some(url),
            StepAction::WaitForTimeout(ms) => raw.ms = Some(ms),
        }
        raw
    }
}
