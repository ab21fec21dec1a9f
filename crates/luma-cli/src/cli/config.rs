use std::path::{Path, PathBuf};

use anyhow::Result;
use luma_core::CoreConfig;

/// Data directory used when neither the config file nor the environment names one.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .map(|dir| dir.join("luma"))
        .unwrap_or_else(|| PathBuf::from(luma_core::constants::DEFAULT_DATA_DIR))
}

/// Load the config file when given, otherwise start from defaults with the
/// data directory under the user's local data dir. Environment overrides win.
pub fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    let config = match path {
        Some(path) => CoreConfig::load(path)?,
        None => CoreConfig::new(default_data_dir()),
    };
    Ok(config.with_env_overrides())
}
