//! Storage layer for atomic file operations and the file-backed key-value store.

mod atomic_file;
mod file_kv;

pub use atomic_file::{AtomicFile, AtomicFileError};
pub use file_kv::FileKeyValueStore;
