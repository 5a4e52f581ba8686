use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// TallyConfig
// ---------------------------------------------------------------------------

/// Workspace configuration stored at `~/.tally/config.json`.
///
/// Every field has a default, so a partial or empty JSON object is a valid
/// config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    // Logging
    pub log_level: String,
    pub log_to_file: bool,

    // Aggregation
    /// Reject referral trees in which the same account id appears twice.
    pub detect_repeated_accounts: bool,

    // Session store
    /// Drop fetch results that were overtaken by a newer fetch or update.
    pub discard_stale_fetches: bool,
    /// Address refreshed on startup, if any.
    pub default_address: Option<String>,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_to_file: true,
            detect_repeated_accounts: true,
            discard_stale_fetches: true,
            default_address: None,
        }
    }
}

impl TallyConfig {
    /// Returns the base config directory: `~/.tally/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".tally"))
    }

    /// Returns the config file path: `~/.tally/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.tally/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Creates `~/.tally/` and its `logs/` subdirectory.
    pub fn ensure_dirs() -> Result<()> {
        for dir in [Self::base_dir()?, Self::logs_dir()?] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Loads `~/.tally/config.json`, writing the defaults there first if the
    /// file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::ensure_dirs()?;
        Self::load_from_path(&Self::config_path()?)
    }

    /// Like [`load`](Self::load) for an arbitrary file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse config: {}", path.display()))?;
                debug!(path = %path.display(), "config loaded");
                Ok(config)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to_path(path)?;
                info!(path = %path.display(), "default config written");
                Ok(config)
            }
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read config: {}", path.display()))
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_path()?)
    }

    /// Writes pretty-printed JSON to `path`, creating its parent directory.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))
    }

    /// Filter directive used when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> String {
        let level = self.log_level.trim();
        let level = if level.is_empty() { "info" } else { level };
        format!("{level},tally_core={level},tally_accounts={level},tally_store={level}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
