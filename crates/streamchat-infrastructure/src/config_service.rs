//! Configuration service implementation.
//!
//! Loads `AppConfig` from `config.toml` (a missing file means defaults) and
//! layers environment overrides on top.

use std::fs;
use std::path::{Path, PathBuf};

use streamchat_core::config::AppConfig;
use streamchat_core::error::{ChatError, Result};

use crate::paths::StreamchatPaths;

pub const ENV_API_KEY: &str = "GOOGLE_API_KEY";
/// Variable name used by the browser build's `.env` files.
pub const ENV_API_KEY_LEGACY: &str = "NEXT_PUBLIC_GOOGLE_API_KEY";
pub const ENV_MODEL: &str = "STREAMCHAT_MODEL";
pub const ENV_DATA_DIR: &str = "STREAMCHAT_DATA_DIR";

#[derive(Debug, Clone, Default)]
pub struct ConfigService {
    paths: StreamchatPaths,
}

impl ConfigService {
    pub fn new(paths: StreamchatPaths) -> Self {
        Self { paths }
    }

    /// Loads the configuration file and applies process environment overrides.
    pub fn load(&self) -> Result<AppConfig> {
        let path = self.paths.config_file()?;
        let config = Self::load_from_file(&path)?;
        Ok(Self::apply_env(config, |name| std::env::var(name).ok()))
    }

    /// Parses `path`, or returns defaults when it does not exist.
    pub fn load_from_file(path: &Path) -> Result<AppConfig> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                return Ok(AppConfig::default());
            }
            Err(err) => return Err(err.into()),
        };

        toml::from_str(&content).map_err(|err| {
            ChatError::config(format!("Invalid config file {}: {}", path.display(), err))
        })
    }

    /// Applies environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(mut config: AppConfig, lookup: F) -> AppConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(key) = non_empty(ENV_API_KEY).or_else(|| non_empty(ENV_API_KEY_LEGACY)) {
            config.api_key = Some(key);
        }
        if let Some(model) = non_empty(ENV_MODEL) {
            config.generation.model = model;
        }
        if let Some(dir) = non_empty(ENV_DATA_DIR) {
            config.storage.data_dir = Some(dir);
        }
        config
    }

    /// Directory for the key-value store: `[storage] data_dir` or the platform default.
    pub fn data_dir(&self, config: &AppConfig) -> Result<PathBuf> {
        match &config.storage.data_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => self.paths.data_dir(),
        }
    }
}
