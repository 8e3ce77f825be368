//! Text-generation collaborator interface.
//!
//! The hosted model is treated as a black box that turns one prompt into a
//! lazy, finite, non-restartable stream of text fragments.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GenerationConfig;

/// Errors raised while opening or reading a generation stream.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GenerationError {
    /// Transport-level failure (connect, timeout, reset).
    #[error("Network error: {message}")]
    Network { message: String, retryable: bool },

    /// Upstream answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retryable: bool,
    },

    /// The stream broke after it had started.
    #[error("Stream error: {0}")]
    Stream(String),

    /// A received event could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The generator is not usable as configured (missing API key, etc.).
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GenerationError {
    /// Whether opening the stream again has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { retryable, .. } | Self::Http { retryable, .. } => *retryable,
            Self::Stream(_) | Self::Parse(_) | Self::Config(_) => false,
        }
    }
}

/// Boxed stream of text fragments in arrival order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// A streaming text generator.
///
/// Retry and reconnection on transient failures belong to the implementation;
/// callers see either an opened stream or a terminal error.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &str;

    /// Opens one streaming generation for `prompt`.
    async fn stream(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<ChunkStream, GenerationError>;
}
