//! Configuration model shared by every streamchat crate.
//!
//! The on-disk form is `config.toml`; see `streamchat_infrastructure::ConfigService`
//! for loading and environment overrides.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:3000";

/// Parameters handed to the text-generation collaborator on every call.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Model identifier, e.g. `gemini-1.5-flash`.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// How many times a failed connection attempt is retried before giving up.
    pub max_retries: u32,
    /// Replay identical prompts from an in-process cache.
    pub cache: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            max_retries: 2,
            cache: true,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the key-value files. `None` means the platform data dir.
    pub data_dir: Option<String>,
    /// Keep at most this many transcript entries. `None` keeps everything.
    pub max_entries: Option<usize>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// Seconds between demo events.
    pub interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_SERVER_ADDR.to_string(),
            interval_secs: 1,
        }
    }
}

/// Root configuration (`config.toml`).
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    /// Gemini API key. Normally supplied through `GOOGLE_API_KEY`, never written back.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}
