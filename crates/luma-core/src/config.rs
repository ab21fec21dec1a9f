use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_DATA_DIR, DEFAULT_FETCH_COOLDOWN_MS, DEFAULT_PAGE_SIZE, DEFAULT_SEED_COUNT,
    UNSPLASH_API_BASE,
};
use crate::transaction::RollbackPolicy;

/// Core configuration, loadable from a JSON file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    /// Directory holding the persisted identity
    pub data_dir: PathBuf,
    pub page_size: usize,
    pub seed_count: usize,
    pub fetch_cooldown_ms: u64,
    /// Undo optimistic writes the server rejects instead of keeping them
    pub rollback_on_failure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsplash_access_key: Option<String>,
    pub unsplash_api_base: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            page_size: DEFAULT_PAGE_SIZE,
            seed_count: DEFAULT_SEED_COUNT,
            fetch_cooldown_ms: DEFAULT_FETCH_COOLDOWN_MS,
            rollback_on_failure: false,
            unsplash_access_key: None,
            unsplash_api_base: UNSPLASH_API_BASE.to_string(),
        }
    }

    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CoreConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Apply `LUMA_DATA_DIR` and `UNSPLASH_ACCESS_KEY` from the environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var("LUMA_DATA_DIR").ok(),
            std::env::var("UNSPLASH_ACCESS_KEY").ok(),
        )
    }

    fn with_overrides(mut self, data_dir: Option<String>, access_key: Option<String>) -> Self {
        if let Some(dir) = data_dir.filter(|d| !d.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(key) = access_key.filter(|k| !k.trim().is_empty()) {
            self.unsplash_access_key = Some(key);
        }
        self
    }

    pub fn rollback_policy(&self) -> RollbackPolicy {
        RollbackPolicy::from_flag(self.rollback_on_failure)
    }

    pub fn fetch_cooldown(&self) -> Duration {
        Duration::from_millis(self.fetch_cooldown_ms)
    }
}
