//! File-backed key-value store: one JSON file per key.

use std::path::{Path, PathBuf};

use streamchat_core::error::{ChatError, Result};
use streamchat_core::transcript::KeyValueStore;

use super::atomic_file::{AtomicFile, AtomicFileError};

impl From<AtomicFileError> for ChatError {
    fn from(err: AtomicFileError) -> Self {
        match err {
            AtomicFileError::Io(io) => ChatError::from(io),
            other => ChatError::storage(other.to_string()),
        }
    }
}

/// Durable key-value store rooted at a directory.
///
/// ```text
/// <root>/
/// ├── message.json     # value for key "message"
/// └── message.lock     # writer lock, kept between writes
/// ```
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, key: &str) -> Result<AtomicFile> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
        if !valid {
            return Err(ChatError::storage(format!("invalid key '{key}'")));
        }
        Ok(AtomicFile::new(self.root.join(format!("{key}.json"))))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.file_for(key)?.read()?)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let file = self.file_for(key)?;
        file.write(value)?;
        tracing::trace!(path = %file.path().display(), bytes = value.len(), "Stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        Ok(self.file_for(key)?.remove()?)
    }
}
