//! Transcript domain module.
//!
//! - `model`: entries, terminal statuses and the ordered `Transcript`
//! - `store`: key-value persistence of the whole transcript under a fixed key

mod model;
mod store;

pub use model::{EntryStatus, Transcript, TranscriptEntry};
pub use store::{KeyValueStore, MemoryKeyValueStore, TRANSCRIPT_KEY, TranscriptStore};
