//! Store configuration
//!
//! Loaded from (in order of priority):
//! 1. An explicit JSON file
//! 2. `store.json` in the gmail-store config directory
//! 3. Environment variables
//! 4. Built-in defaults

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config filename in the gmail-store config directory
const CONFIG_FILE: &str = "store.json";

/// Database filename used when no path is configured
const DEFAULT_DATABASE_FILE: &str = "mail.db";

const ENV_DATABASE: &str = "GMAIL_STORE_DATABASE";
const ENV_SYNC_LIMIT: &str = "GMAIL_STORE_SYNC_LIMIT";

/// Settings for opening the store and running sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Messages fetched per user by `SyncRunner::run`
    pub sync_limit_per_user: usize,
    /// Thread page size applied by `ThreadDeduplicator::with_config` when
    /// the caller gives no limit
    pub default_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: Self::default_database_path(),
            sync_limit_per_user: 100,
            default_page_size: 50,
        }
    }
}

impl StoreConfig {
    /// Load config from the default file, falling back to env vars and defaults
    pub fn load() -> Result<Self> {
        if config::config_exists(CONFIG_FILE) {
            return config::load_json(CONFIG_FILE);
        }

        Self::from_env()
    }

    /// Load config from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Parse config from a JSON string; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse store config JSON")
    }

    /// Defaults overridden by whichever environment variables are set
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = var(ENV_DATABASE) {
            config.database_path = PathBuf::from(path);
        }

        if let Some(limit) = var(ENV_SYNC_LIMIT) {
            config.sync_limit_per_user = limit
                .trim()
                .parse()
                .with_context(|| format!("{ENV_SYNC_LIMIT} is not a valid number: {limit}"))?;
        }

        Ok(config)
    }

    /// Save config to the default file
    pub fn save(&self) -> Result<()> {
        config::save_json(CONFIG_FILE, self)
    }

    /// Save config to a specific JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        config::save_json_file(path, self)
    }

    /// Get the default config file path (~/.config/gmail-store/store.json)
    pub fn default_config_path() -> Option<PathBuf> {
        config::config_path(CONFIG_FILE)
    }

    /// Database path inside the config directory, or the working directory
    fn default_database_path() -> PathBuf {
        config::config_path(DEFAULT_DATABASE_FILE)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_FILE))
    }
}
