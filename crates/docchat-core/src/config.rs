//! Configuration types and loading for docchat.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::Result;
use crate::paths;

/// Default backend base URL.
pub const DEFAULT_API_URL: &str = "https://lawrana.com";

/// Document status the backend reports once indexing is done.
pub const DEFAULT_FINISHED_STATUS: &str = "Finalizado";

/// Largest document accepted for upload (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend connection settings.
    pub api: ApiConfig,

    /// Message processing status polling.
    pub polling: PollingConfig,

    /// Document indexing wait.
    pub indexing: IndexingConfig,

    /// Character reveal animation.
    pub reveal: RevealConfig,

    /// Document upload rules.
    pub upload: UploadConfig,
}

impl Config {
    /// Load configuration from the default config file.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            let mut config = Self::default();
            config.apply_env();
            Ok(config)
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        paths::config_dir().join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ensure config exists at the given path, creating defaults if missing.
    pub fn ensure_at(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            let mut config = Self::default();
            config.expand_paths();
            config.save_to_path(path)?;
            config.apply_env();
            Ok(config)
        }
    }

    /// Expand a path, replacing ~ with home directory.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    fn expand_paths(&mut self) {
        self.api.token_file = Self::expand_path(&self.api.token_file.to_string_lossy());
    }

    /// Apply `DOCCHAT_*` environment overrides.
    fn apply_env(&mut self) {
        let prefix = crate::env_prefix();
        if let Ok(url) = std::env::var(format!("{prefix}_API_URL")) {
            if !url.trim().is_empty() {
                self.api.base_url = url.trim().to_string();
            }
        }
        if let Ok(token) = std::env::var(format!("{prefix}_TOKEN")) {
            if !token.trim().is_empty() {
                self.api.token = Some(token.trim().to_string());
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(Error::Config("api.base_url must not be empty".to_string()));
        }
        if self.polling.interval_ms == 0 || self.indexing.interval_ms == 0 {
            return Err(Error::Config(
                "polling and indexing intervals must be positive".to_string(),
            ));
        }
        if self.reveal.tick_ms == 0 {
            return Err(Error::Config("reveal.tick_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Token to authenticate with: the environment override, else the token file.
    pub fn read_token(&self) -> Result<Option<String>> {
        if let Some(token) = &self.api.token {
            return Ok(Some(token.clone()));
        }
        if !self.api.token_file.exists() {
            return Ok(None);
        }
        let token = std::fs::read_to_string(&self.api.token_file)?;
        let token = token.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }

    /// Persist a token obtained from login.
    pub fn store_token(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.api.token_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.api.token_file, token)?;
        Ok(())
    }

    /// Remove the persisted token, if any.
    pub fn clear_token(&self) -> Result<()> {
        if self.api.token_file.exists() {
            std::fs::remove_file(&self.api.token_file)?;
        }
        Ok(())
    }
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the chat backend.
    pub base_url: String,

    /// File holding the bearer token written by `docchat login`.
    pub token_file: PathBuf,

    /// Per-request timeout; unset leaves the HTTP client default.
    pub request_timeout_secs: Option<u64>,

    /// Token from `DOCCHAT_TOKEN`, never written to disk.
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            token_file: paths::token_path(),
            request_timeout_secs: None,
            token: None,
        }
    }
}

/// Processing status polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Milliseconds between status queries.
    pub interval_ms: u64,

    /// Give up after this many queries. Unset polls until the job finishes.
    pub max_attempts: Option<u32>,
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            max_attempts: None,
        }
    }
}

/// Document indexing wait configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Milliseconds between directory tree checks.
    pub interval_ms: u64,

    /// Give up after this many checks. Unset waits until the document is final.
    pub max_checks: Option<u32>,

    /// Status value marking a fully indexed document.
    pub finished_status: String,
}

impl IndexingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            max_checks: None,
            finished_status: DEFAULT_FINISHED_STATUS.to_string(),
        }
    }
}

/// Reveal animation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealConfig {
    /// Characters revealed per tick.
    pub chunk_chars: usize,

    /// Milliseconds between ticks.
    pub tick_ms: u64,
}

impl RevealConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            chunk_chars: 3,
            tick_ms: 20,
        }
    }
}

/// Upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum document size in bytes.
    pub max_bytes: u64,

    /// Milliseconds before the upload status resets after finishing.
    pub settle_ms: u64,

    /// Directory receiving uploads. Unset uses the root directory.
    pub directory_id: Option<String>,
}

impl UploadConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            settle_ms: 3_000,
            directory_id: None,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
