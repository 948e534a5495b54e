// src/error.rs

//! Unified error handling for the extraction pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error (never retried)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A scripted pre-navigation step failed
    #[error("Step {index} ({action}) failed: {message}")]
    Step {
        index: usize,
        action: String,
        message: String,
    },

    /// A bounded wait elapsed
    #[error("Timed out after {timeout_ms}ms waiting for {waiting_for}")]
    Timeout { waiting_for: String, timeout_ms: u64 },

    /// Navigation to a location failed
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    /// Checkpoint marker missing or below the configured minimum
    #[error("Checkpoint failed: {0}")]
    Checkpoint(String),

    /// Nothing usable could be extracted
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Persistence collaborator failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// No profile is configured for the requested source
    #[error("Unknown source '{0}'")]
    UnknownSource(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a step failure naming the step index and action.
    pub fn step(index: usize, action: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Step {
            index,
            action: action.into(),
            message: message.to_string(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(waiting_for: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            waiting_for: waiting_for.into(),
            timeout_ms,
        }
    }

    /// Create a navigation error.
    pub fn navigation(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Navigation {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a checkpoint error.
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint(message.into())
    }

    /// Create an extraction error.
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Configuration problems abort the whole pipeline instead of
    /// degrading to an item skip.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Selector { .. })
    }

    /// Whether this error is a bounded wait that elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
