//! Wiring from configuration to the session and its collaborators.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use streamchat_core::{
    AppConfig, SessionController, SessionOptions, TextGenerator, TranscriptStore,
};
use streamchat_infrastructure::{ConfigService, FileKeyValueStore, StreamchatPaths};
use streamchat_interaction::{CachingGenerator, GeminiClient, cache::DEFAULT_CAPACITY};

/// Options shared by every subcommand; each overrides the config file and environment.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file to read instead of `<config_dir>/streamchat/config.toml`
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding the saved transcript
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Model identifier, e.g. gemini-1.5-flash
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Sampling temperature
    #[arg(long, global = true)]
    pub temperature: Option<f32>,

    /// Always ask the model, bypassing the response cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Log at debug level unless STREAMCHAT_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Loaded configuration plus the service that resolved it.
pub struct App {
    pub config: AppConfig,
    service: ConfigService,
}

impl App {
    /// Loads config (file, then environment, then flags).
    pub fn load(args: &GlobalArgs) -> Result<Self> {
        let service = ConfigService::new(StreamchatPaths::new());
        let config = match &args.config {
            Some(path) => {
                let config = ConfigService::load_from_file(path)?;
                ConfigService::apply_env(config, |name| std::env::var(name).ok())
            }
            None => service.load()?,
        };
        let config = apply_flags(config, args);
        tracing::debug!(
            model = %config.generation.model,
            temperature = config.generation.temperature,
            cache = config.generation.cache,
            "Configuration loaded"
        );
        Ok(Self { config, service })
    }

    /// Transcript store over the file key-value store in the data directory.
    pub fn transcript_store(&self) -> Result<TranscriptStore> {
        let data_dir = self.service.data_dir(&self.config)?;
        tracing::debug!(path = %data_dir.display(), "Using data directory");
        Ok(TranscriptStore::new(Arc::new(FileKeyValueStore::new(data_dir))))
    }

    /// Gemini client behind the response cache.
    pub fn generator(&self) -> Result<Arc<dyn TextGenerator>> {
        let client = GeminiClient::from_config(&self.config)?;
        Ok(Arc::new(CachingGenerator::new(Arc::new(client), DEFAULT_CAPACITY)))
    }

    /// A session over the persisted transcript, ready for submissions.
    pub fn session(&self) -> Result<SessionController> {
        let options = SessionOptions {
            max_entries: self.config.storage.max_entries,
        };
        SessionController::new(
            self.generator()?,
            self.config.generation.clone(),
            self.transcript_store()?,
            options,
        )
        .context("Failed to open chat session")
    }
}

pub fn apply_flags(mut config: AppConfig, args: &GlobalArgs) -> AppConfig {
    if let Some(dir) = &args.data_dir {
        config.storage.data_dir = Some(dir.to_string_lossy().into_owned());
    }
    if let Some(model) = &args.model {
        config.generation.model = model.clone();
    }
    if let Some(temperature) = args.temperature {
        config.generation.temperature = temperature;
    }
    if args.no_cache {
        config.generation.cache = false;
    }
    config
}
