// src/services/page.rs

//! The live document session driven by the pipeline.

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Target;
use crate::services::document;

/// Something to wait for on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// At least one element matches the CSS selector
    Selector(String),
    /// The page text loosely contains the string
    Text(String),
    /// The current location contains the substring
    UrlMatches(String),
    /// The current location differs from the given one
    UrlChangedFrom(String),
    /// Any of the inner conditions holds
    AnyOf(Vec<WaitCondition>),
}

impl WaitCondition {
    /// Evaluate against a document and its location.
    pub fn is_met(&self, url: &str, html: &str) -> Result<bool> {
        Ok(match self {
            WaitCondition::Selector(css) => document::count(html, css)? > 0,
            WaitCondition::Text(text) => document::locate(html, &Target::Text(text.clone()))?.is_some(),
            WaitCondition::UrlMatches(fragment) => url.contains(fragment.as_str()),
            WaitCondition::UrlChangedFrom(previous) => url != previous,
            WaitCondition::AnyOf(conditions) => {
                for condition in conditions {
                    if condition.is_met(url, html)? {
                        return Ok(true);
                    }
                }
                false
            }
        })
    }

    /// Whether re-fetching the same location could ever satisfy this.
    pub fn can_change_by_polling(&self) -> bool {
        match self {
            WaitCondition::UrlChangedFrom(_) | WaitCondition::UrlMatches(_) => false,
            WaitCondition::AnyOf(conditions) => conditions.iter().any(Self::can_change_by_polling),
            _ => true,
        }
    }
}

impl From<&Target> for WaitCondition {
    fn from(target: &Target) -> Self {
        match target {
            Target::Selector(css) => WaitCondition::Selector(css.clone()),
            Target::Text(text) => WaitCondition::Text(text.clone()),
            Target::Within { container, .. } => WaitCondition::Selector(container.clone()),
        }
    }
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitCondition::Selector(css) => write!(f, "selector '{css}'"),
            WaitCondition::Text(text) => write!(f, "text '{text}'"),
            WaitCondition::UrlMatches(fragment) => write!(f, "url matching '{fragment}'"),
            WaitCondition::UrlChangedFrom(url) => write!(f, "url to change from {url}"),
            WaitCondition::AnyOf(conditions) => {
                let parts: Vec<String> = conditions.iter().map(|c| c.to_string()).collect();
                write!(f, "any of [{}]", parts.join(", "))
            }
        }
    }
}

/// A live document session owned by exactly one run.
///
/// Every operation is a suspension point; callers drive a page strictly
/// sequentially.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate to `url`.
    async fn goto(&mut self, url: &str, timeout_ms: u64) -> Result<()>;

    /// Location of the current document.
    fn current_url(&self) -> String;

    /// HTML of the current document.
    fn content(&self) -> String;

    /// Locations the navigation that produced the current document went
    /// through, ending at [`Page::current_url`].
    fn redirect_chain(&self) -> Vec<String> {
        vec![self.current_url()]
    }

    /// Activate an element, waiting up to `timeout_ms` for it to appear.
    async fn click(&mut self, target: &Target, timeout_ms: u64) -> Result<()>;

    /// Ensure a checkbox or radio is checked.
    async fn check(&mut self, target: &Target, timeout_ms: u64) -> Result<()>;

    /// Type a value into an input-like element.
    async fn fill(&mut self, target: &Target, value: &str, timeout_ms: u64) -> Result<()>;

    /// Wait until `condition` holds.
    async fn wait_for(&mut self, condition: &WaitCondition, timeout_ms: u64) -> Result<()>;

    /// Number of elements matching `selector` right now.
    fn count(&self, selector: &str) -> Result<usize>;

    /// Rendered text of the element a target refers to.
    fn text_of(&self, target: &Target) -> Result<Option<String>>;

    /// Attribute of the element a target refers to.
    fn attr_of(&self, target: &Target, name: &str) -> Result<Option<String>>;

    /// Return to the previous document.
    async fn go_back(&mut self, timeout_ms: u64) -> Result<()>;

    /// Visible text of the whole document.
    fn body_text(&self) -> String;
}
