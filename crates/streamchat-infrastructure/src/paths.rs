//! Unified path management for streamchat files.
//!
//! ```text
//! ~/.config/streamchat/        # Config directory
//! └── config.toml              # Application configuration
//!
//! ~/.local/share/streamchat/   # Data directory
//! └── message.json             # Persisted transcript
//! ```

use std::path::PathBuf;

use streamchat_core::error::{ChatError, Result};

const APP_DIR: &str = "streamchat";

/// Resolves streamchat's directories, honoring explicit overrides.
#[derive(Debug, Clone, Default)]
pub struct StreamchatPaths {
    config_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
}

impl StreamchatPaths {
    /// Platform defaults (XDG on Linux, the usual locations elsewhere).
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the config directory (tests, `--config-dir`).
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Overrides the data directory (`STREAMCHAT_DATA_DIR`, `[storage] data_dir`).
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn config_dir(&self) -> Result<PathBuf> {
        match &self.config_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::config_dir()
                .map(|dir| dir.join(APP_DIR))
                .ok_or_else(|| ChatError::config("Cannot find config directory")),
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join(APP_DIR))
                .ok_or_else(|| ChatError::config("Cannot find data directory")),
        }
    }

    /// Path to `config.toml`.
    pub fn config_file(&self) -> Result<PathBuf> {
        Ok(self.config_dir()?.join("config.toml"))
    }
}
