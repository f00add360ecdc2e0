//! Configuration loaded from `config.toml` in the data directory

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::storage::AdaptiveSettings;
use crate::sync::ConflictResolution;

pub const CONFIG_FILE: &str = "config.toml";

/// Written by `adaptive init`
pub const DEFAULT_CONFIG: &str = r#"# Adaptive Layout Configuration

[remote]
# Base URL of the adaptive API (e.g. "https://lms.example.com/api/user").
# Leave unset to run local-only; writes queue until a remote is configured.
# base_url = ""
# Client-side timeout for every remote call in milliseconds
timeout_ms = 10000

[sync]
# Conflict policy sent with preference syncs: client_wins, server_wins, manual
conflict_resolution = "client_wins"
# Coalescing window for snapshot pushes after local mutations
snapshot_debounce_ms = 500

[adaptive]
learningRate = 0.1
# Event log length at which adaptation is evaluated on every interaction
minInteractions = 5
adaptationThreshold = 0.7
# Milliseconds (7 days)
resetInterval = 604800000
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub sync: SyncSettings,
    pub adaptive: AdaptiveSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 10_000,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Configured and non-empty base URL
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub conflict_resolution: ConflictResolution,
    pub snapshot_debounce_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            conflict_resolution: ConflictResolution::ClientWins,
            snapshot_debounce_ms: 500,
        }
    }
}

impl SyncSettings {
    pub fn snapshot_debounce(&self) -> Duration {
        Duration::from_millis(self.snapshot_debounce_ms)
    }
}

/// Load configuration, defaulting when the file does not exist
pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    if !config_path.exists() {
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(config_path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration
pub fn save_config(config: &AppConfig, config_path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(config_path, content)?;
    Ok(())
}
