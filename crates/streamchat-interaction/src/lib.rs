//! Text-generation backends for streamchat.
//!
//! - [`gemini::GeminiClient`]: streaming Gemini REST client
//! - [`cache::CachingGenerator`]: replays completed responses
//! - [`sse`]: SSE decoding shared by streaming clients

pub mod cache;
pub mod gemini;
pub mod sse;

pub use cache::{CachingGenerator, ResponseCache};
pub use gemini::GeminiClient;
