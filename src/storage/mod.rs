//! Storage module for the adaptive layout engine
//!
//! Local persistence: a durable key/value cache (SQLite) and an ephemeral
//! session scope, both behind the `LocalCache` trait so the engine takes
//! its storage as an injected dependency.

use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

pub mod cache;
pub mod preferences;

pub use cache::CacheStore;
pub use preferences::{
    AdaptiveSettings, CardSize, GridColumns, LayoutPatch, LayoutPreference, LayoutPreferences,
    SortOrder,
};

/// Aggregate + preferences + settings, JSON encoded
pub const BEHAVIOR_KEY: &str = "adaptiveLayoutBehavior";
/// Capped interaction event log, JSON encoded
pub const HISTORY_KEY: &str = "adaptiveLayoutHistory";
/// RFC 3339 timestamp of the last adaptation pass
pub const LAST_ADAPTATION_KEY: &str = "lastAdaptation";
/// Session-scoped identifier, regenerated per session
pub const SESSION_ID_KEY: &str = "adaptiveSessionId";

/// File name of the cache database inside the data directory
pub const CACHE_DB: &str = "cache.sqlite";

/// Synchronous key/value storage
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-lifetime storage; backs the session scope
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Initialize the data directory: cache database and default config
pub fn init(data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join(CACHE_DB);
    CacheStore::open(&db_path)?;
    info!("Adaptive layout cache initialized at {:?}", db_path);

    let config_path = data_dir.join(crate::config::CONFIG_FILE);
    if !config_path.exists() {
        std::fs::write(&config_path, crate::config::DEFAULT_CONFIG)?;
        info!("Created default configuration at {:?}", config_path);
    }

    Ok(())
}

/// Resolve the data directory
///
/// `ADAPTIVE_LAYOUT_DIR` wins, then a project-local `.adaptive`, then
/// `~/.adaptive`.
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("ADAPTIVE_LAYOUT_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    let cwd = std::env::current_dir()?;
    let project_dir = cwd.join(".adaptive");
    if project_dir.exists() {
        return Ok(project_dir);
    }

    let home = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home.join(".adaptive"))
}
