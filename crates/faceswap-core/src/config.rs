//! Application configuration management.
//!
//! This module handles loading and saving the configuration: the service
//! base URL, polling cadence, request timeout and where the session is kept.
//!
//! Configuration is stored at `~/.config/faceswap/config.json`. Values can be
//! overridden with `FACESWAP_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};
use crate::swap::PollConfig;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "faceswap";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Service URL used when nothing is configured (local development server)
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

/// Time between two job status checks.
/// One second keeps the result snappy without hammering the queue.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Status checks before a job is declared timed out (10 minutes at 1s).
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 600;

const ENV_BASE_URL: &str = "FACESWAP_BASE_URL";
const ENV_POLL_INTERVAL_MS: &str = "FACESWAP_POLL_INTERVAL_MS";
const ENV_TOKEN_STORE: &str = "FACESWAP_TOKEN_STORE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    #[default]
    File,
    Keyring,
    Memory,
}

impl TokenStoreKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Some(Self::File),
            "keyring" => Some(Self::Keyring),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub poll_interval_ms: u64,
    /// `None` polls until the job finishes, however long that takes
    pub max_poll_attempts: Option<u32>,
    pub request_timeout_secs: u64,
    pub token_store: TokenStoreKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_attempts: Some(DEFAULT_MAX_POLL_ATTEMPTS),
            request_timeout_secs: crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS,
            token_store: TokenStoreKind::default(),
        }
    }
}

impl Config {
    /// Load the saved configuration and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let mut config: Self =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.sanitize();
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Replace zero interval or timeout with the defaults.
    fn sanitize(&mut self) {
        if self.poll_interval_ms == 0 {
            warn!("Ignoring poll_interval_ms = 0 in config file");
            self.poll_interval_ms = DEFAULT_POLL_INTERVAL_MS;
        }
        if self.request_timeout_secs == 0 {
            warn!("Ignoring request_timeout_secs = 0 in config file");
            self.request_timeout_secs = crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;
        }
    }

    /// Apply `FACESWAP_*` overrides. Unparseable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|u| !u.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.poll_interval_ms = ms,
                _ => warn!(value = %raw, "Ignoring invalid {}", ENV_POLL_INTERVAL_MS),
            }
        }
        if let Some(raw) = lookup(ENV_TOKEN_STORE) {
            match TokenStoreKind::parse(&raw) {
                Some(kind) => self.token_store = kind,
                None => warn!(value = %raw, "Ignoring invalid {}", ENV_TOKEN_STORE),
            }
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_poll_attempts,
        }
    }

    /// Open the configured session store
    pub fn token_store(&self) -> Result<Box<dyn TokenStore>> {
        Ok(match self.token_store {
            TokenStoreKind::File => Box::new(FileTokenStore::new(self.cache_dir()?)),
            TokenStoreKind::Keyring => Box::new(KeyringTokenStore::new()),
            TokenStoreKind::Memory => Box::new(MemoryTokenStore::new()),
        })
    }
}
