//! Session subsystem configuration.
//!
//! Configuration is read from `~/.config/tokenwarden/config.json` when the
//! file exists, then overridden from the environment (a `.env` file is
//! loaded first if present).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "tokenwarden";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Where credentials are persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    #[default]
    File,
    Keyring,
}

impl std::str::FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "file" => Ok(StorageKind::File),
            "keyring" => Ok(StorageKind::Keyring),
            other => Err(anyhow::anyhow!("Unknown storage kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub base_url: String,
    pub login_path: String,
    pub logout_path: String,
    pub refresh_path: String,
    pub me_path: String,
    /// Bound on the current-user fetch during a session check.
    pub identity_timeout_secs: u64,
    /// Client-side bound on the login request.
    pub login_timeout_secs: u64,
    /// Transport-level timeout applied to every request.
    pub request_timeout_secs: u64,
    /// Renew this long before the access credential expires.
    pub renew_threshold_secs: u64,
    /// Extra attempts for a renewal that failed on timeout/network.
    pub renewal_retries: u32,
    pub renewal_backoff_ms: u64,
    pub storage: StorageKind,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            login_path: "/auth/login".to_string(),
            logout_path: "/auth/logout".to_string(),
            refresh_path: "/auth/refresh-token".to_string(),
            me_path: "/auth/me".to_string(),
            identity_timeout_secs: 8,
            login_timeout_secs: 15,
            request_timeout_secs: 30,
            renew_threshold_secs: 5 * 60,
            renewal_retries: 2,
            renewal_backoff_ms: 1000,
            storage: StorageKind::default(),
        }
    }
}

impl SessionConfig {
    /// Load from the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        // Load .env file if present (silently ignore if not found)
        let _ = dotenvy::dotenv();

        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("TOKENWARDEN_BASE_URL") {
            self.base_url = url;
        }
        if let Some(storage) = var("TOKENWARDEN_STORAGE") {
            self.storage = storage.parse()?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_secs(self.identity_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn renew_threshold(&self) -> Duration {
        Duration::from_secs(self.renew_threshold_secs)
    }

    pub fn renewal_backoff(&self) -> Duration {
        Duration::from_millis(self.renewal_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_session_policy() {
        let config = SessionConfig::default();
        assert_eq!(config.identity_timeout(), Duration::from_secs(8));
        assert_eq!(config.login_timeout(), Duration::from_secs(15));
        assert_eq!(config.renew_threshold(), Duration::from_secs(300));
        assert_eq!(config.me_path, "/auth/me");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"base_url": "https://crm.example.com/api", "storage": "keyring"}"#)
                .expect("parse");
        assert_eq!(config.base_url, "https://crm.example.com/api");
        assert_eq!(config.storage, StorageKind::Keyring);
        assert_eq!(config.refresh_path, "/auth/refresh-token");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SessionConfig::default();
        config
            .apply_env(|key| match key {
                "TOKENWARDEN_BASE_URL" => Some("https://staging.example.com".into()),
                "TOKENWARDEN_STORAGE" => Some("Memory".into()),
                _ => None,
            })
            .expect("apply");
        assert_eq!(config.base_url, "https://staging.example.com");
        assert_eq!(config.storage, StorageKind::Memory);

        assert!(config
            .apply_env(|key| (key == "TOKENWARDEN_STORAGE").then(|| "floppy".to_string()))
            .is_err());
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let config = SessionConfig {
            base_url: "https://crm.example.com/api/".into(),
            ..SessionConfig::default()
        };
        assert_eq!(config.url(&config.me_path), "https://crm.example.com/api/auth/me");
    }
}
