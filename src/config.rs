// src/config.rs

//! Configuration loading utilities.
//!
//! The file lives at `<storage_dir>/config.toml`. Environment variables
//! are applied on top of whatever was loaded:
//!
//! | Variable                     | Field                    |
//! |------------------------------|--------------------------|
//! | `TAXWATCH_STORAGE_DIR`       | `storage.root_dir`       |
//! | `TAXWATCH_HTTP_TIMEOUT_SECS` | `http.timeout_secs`      |
//! | `TAXWATCH_POLL_INTERVAL_MS`  | `http.poll_interval_ms`  |
//! | `TAXWATCH_KEEPALIVE_SECS`    | `events.keepalive_secs`  |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::models::Config;

pub const CONFIG_FILE: &str = "config.toml";

const ENV_STORAGE_DIR: &str = "TAXWATCH_STORAGE_DIR";
const ENV_HTTP_TIMEOUT: &str = "TAXWATCH_HTTP_TIMEOUT_SECS";
const ENV_POLL_INTERVAL: &str = "TAXWATCH_POLL_INTERVAL_MS";
const ENV_KEEPALIVE: &str = "TAXWATCH_KEEPALIVE_SECS";

/// Load `<storage_dir>/config.toml`, apply environment overrides and
/// validate the result.
///
/// A missing or unreadable file falls back to defaults; the storage root
/// then defaults to `storage_dir` itself.
pub fn load_config(storage_dir: &Path) -> Result<Config> {
    let path = storage_dir.join(CONFIG_FILE);
    let mut config = if path.exists() {
        Config::load(&path)?
    } else {
        log::warn!("No config at {}, using defaults", path.display());
        let mut config = Config::default();
        config.storage.root_dir = storage_dir.to_path_buf();
        config
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Apply overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup(ENV_STORAGE_DIR) {
        config.storage.root_dir = PathBuf::from(dir);
    }
    if let Some(secs) = parse_var(&lookup, ENV_HTTP_TIMEOUT)? {
        config.http.timeout_secs = secs;
    }
    if let Some(ms) = parse_var(&lookup, ENV_POLL_INTERVAL)? {
        config.http.poll_interval_ms = ms;
    }
    if let Some(secs) = parse_var(&lookup, ENV_KEEPALIVE)? {
        config.events.keepalive_secs = secs;
    }
    Ok(())
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| AppError::config(format!("{key}='{raw}': {e}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("TAXWATCH_STORAGE_DIR", "/var/lib/taxwatch"),
                ("TAXWATCH_HTTP_TIMEOUT_SECS", "5"),
                ("TAXWATCH_KEEPALIVE_SECS", " 30 "),
            ]),
        )
        .unwrap();

        assert_eq!(config.storage.root_dir, PathBuf::from("/var/lib/taxwatch"));
        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.http.poll_interval_ms, 500);
        assert_eq!(config.events.keepalive_secs, 30);
    }

    #[test]
    fn test_invalid_override_is_config_error() {
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config, env(&[("TAXWATCH_POLL_INTERVAL_MS", "fast")]))
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("TAXWATCH_POLL_INTERVAL_MS"));
    }

    #[test]
    fn test_load_missing_file_uses_storage_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn test_load_rejects_unknown_action() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r##"
            [[profiles]]
            name = "tax"
            sources = ["https://portal.example.com/search"]

            [[profiles.pre_steps]]
            action = "hover"
            selector = "#menu"
            "##,
        )
        .unwrap();

        let err = load_config(dir.path()).unwrap_err();
        assert!(err.to_string().contains("hover"), "{err}");
    }
}
