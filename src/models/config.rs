//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::PortalProfile;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP session behavior
    #[serde(default)]
    pub http: HttpConfig,

    /// Where runs, snapshots and artifacts are written
    #[serde(default)]
    pub storage: StorageConfig,

    /// Event streaming settings
    #[serde(default)]
    pub events: EventsConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Portal profiles, looked up by name
    #[serde(default)]
    pub profiles: Vec<PortalProfile>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Find the profile for a source.
    pub fn profile(&self, name: &str) -> Result<&PortalProfile> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| AppError::UnknownSource(name.to_string()))
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.http.poll_interval_ms == 0 {
            return Err(AppError::validation("http.poll_interval_ms must be > 0"));
        }
        if self.events.keepalive_secs == 0 {
            return Err(AppError::validation("events.keepalive_secs must be > 0"));
        }

        let mut names = HashSet::new();
        for profile in &self.profiles {
            profile.validate()?;
            if !names.insert(profile.name.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate profile name '{}'",
                    profile.name
                )));
            }
        }
        Ok(())
    }
}

/// HTTP session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Interval between re-fetches while waiting for a condition
    #[serde(default = "defaults::poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            poll_interval_ms: defaults::poll_interval(),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for run records and snapshots
    #[serde(default = "defaults::root_dir")]
    pub root_dir: PathBuf,

    /// Write HTML captures of item pages
    #[serde(default = "defaults::capture_artifacts")]
    pub capture_artifacts: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: defaults::root_dir(),
            capture_artifacts: defaults::capture_artifacts(),
        }
    }
}

/// Event streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Idle period after which observers emit a keep-alive
    #[serde(default = "defaults::keepalive")]
    pub keepalive_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: defaults::keepalive(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level filter when `RUST_LOG` is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; taxwatch/0.1)".into()
    }
    pub fn timeout() -> u64 {
        45
    }
    pub fn poll_interval() -> u64 {
        500
    }
    pub fn root_dir() -> PathBuf {
        PathBuf::from("storage")
    }
    pub fn capture_artifacts() -> bool {
        true
    }
    pub fn keepalive() -> u64 {
        15
    }
    pub fn log_level() -> String {
        "info".into()
    }
}
