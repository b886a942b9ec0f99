//! Application configuration management.
//!
//! Configuration is read from `~/.config/imagesync/config.json` (platform
//! config directory) and may be overridden by `IMAGESYNC_*` environment
//! variables. A missing file yields the defaults.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::store::{is_valid_app_id, SledBackend};
use crate::sync::manager::DEFAULT_CONCURRENCY;

/// Application name used for the config directory path
const APP_NAME: &str = "imagesync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const ENV_APP_ID: &str = "IMAGESYNC_APP_ID";
const ENV_SERVER: &str = "IMAGESYNC_SERVER";
const ENV_CONCURRENCY: &str = "IMAGESYNC_CONCURRENCY";
const ENV_STORE: &str = "IMAGESYNC_STORE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Namespace for every store key (`@{app_id}:{key}`).
    pub app_id: String,
    /// Image server host, optionally with a scheme.
    pub image_server: String,
    /// Maximum image downloads in flight during a sync.
    pub concurrency: usize,
    /// Store database directory; `None` uses the platform data directory.
    pub store_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_id: APP_NAME.to_string(),
            image_server: "localhost:8000".to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            store_path: None,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Override fields from `IMAGESYNC_*` variables looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(app_id) = var(ENV_APP_ID) {
            self.app_id = app_id;
        }
        if let Some(server) = var(ENV_SERVER) {
            self.image_server = server;
        }
        if let Some(raw) = var(ENV_CONCURRENCY) {
            self.concurrency = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer, got {:?}", ENV_CONCURRENCY, raw))?;
        }
        if let Some(path) = var(ENV_STORE) {
            self.store_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_app_id(&self.app_id) {
            bail!("app_id must be non-empty and must not contain ':', got {:?}", self.app_id);
        }
        if self.image_server.trim().is_empty() {
            bail!("image_server must not be empty");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Configured store directory, or the platform default.
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => SledBackend::default_path()
                .ok_or_else(|| anyhow::anyhow!("Could not find data directory")),
        }
    }
}
