//! Application configuration management.
//!
//! Holds the service base URL, the session storage backend and the last
//! used username. Configuration is stored at `~/.config/xlsxmatch/config.json`
//! and the base URL can be overridden from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "xlsxmatch";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable holding the service base URL.
pub const API_URL_ENV: &str = "XLSXMATCH_API_URL";

/// Variable name used by the web front end; still honoured.
const LEGACY_API_URL_ENV: &str = "NEXT_PUBLIC_API_URL";

/// Where the session snapshot is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub base_url: Option<String>,
    pub last_username: Option<String>,
    #[serde(default)]
    pub session_backend: SessionBackend,
    pub request_timeout_secs: Option<u64>,
    pub output_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the file-backed session
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Resolve the base URL: environment first, then the config file.
    pub fn resolve_base_url(&self) -> Result<String> {
        Self::base_url_from(
            std::env::var(API_URL_ENV).ok(),
            std::env::var(LEGACY_API_URL_ENV).ok(),
            self.base_url.as_deref(),
        )
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No API base URL configured. Set {} or add \"base_url\" to the config file.",
                API_URL_ENV
            )
        })
    }

    fn base_url_from(
        primary: Option<String>,
        legacy: Option<String>,
        configured: Option<&str>,
    ) -> Option<String> {
        [primary, legacy, configured.map(str::to_string)]
            .into_iter()
            .flatten()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .find(|url| !url.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_precedence() {
        let url = Config::base_url_from(
            Some("https://env.example".into()),
            Some("https://legacy.example".into()),
            Some("https://file.example"),
        );
        assert_eq!(url.as_deref(), Some("https://env.example"));

        let url = Config::base_url_from(None, Some("https://legacy.example/".into()), None);
        assert_eq!(url.as_deref(), Some("https://legacy.example"));

        let url = Config::base_url_from(Some("  ".into()), None, Some("https://file.example"));
        assert_eq!(url.as_deref(), Some("https://file.example"));

        assert!(Config::base_url_from(None, None, None).is_none());
    }

    #[test]
    fn test_config_round_trip_through_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = Config {
            base_url: Some("https://api.example".into()),
            last_username: Some("alice".into()),
            session_backend: SessionBackend::Keyring,
            request_timeout_secs: Some(10),
            output_dir: None,
        };
        config.save_to(&path).expect("save");

        let loaded = Config::load_from(&path).expect("load");
        assert_eq!(loaded.base_url.as_deref(), Some("https://api.example"));
        assert_eq!(loaded.last_username.as_deref(), Some("alice"));
        assert_eq!(loaded.session_backend, SessionBackend::Keyring);
        assert_eq!(loaded.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_missing_config_is_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = Config::load_from(&dir.path().join(CONFIG_FILE)).expect("load");
        assert!(loaded.base_url.is_none());
        assert_eq!(loaded.session_backend, SessionBackend::File);
        assert_eq!(loaded.request_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_session_backend_serializes_lowercase() {
        let json = serde_json::to_string(&SessionBackend::Keyring).expect("serialize");
        assert_eq!(json, "\"keyring\"");
    }
}
