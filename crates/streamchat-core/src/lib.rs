//! Core session model for streamchat.
//!
//! A prompt becomes a transcript entry whose response grows as chunks arrive
//! from a [`generation::TextGenerator`]. The [`session::SessionController`]
//! serializes submissions, and the [`transcript::TranscriptStore`] persists the
//! history through any [`transcript::KeyValueStore`].

pub mod config;
pub mod error;
pub mod generation;
pub mod session;
pub mod transcript;

// Re-export common types
pub use config::{AppConfig, GenerationConfig};
pub use error::{ChatError, Result};
pub use generation::{ChunkStream, GenerationError, TextGenerator};
pub use session::{SessionController, SessionOptions, SubmitOutcome};
pub use transcript::{EntryStatus, Transcript, TranscriptEntry, TranscriptStore};
