//! Atomic whole-file writes.
//!
//! Readers either see the previous content or the new content, never a
//! partially written file.

use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur during atomic file operations.
#[derive(Debug, Error)]
pub enum AtomicFileError {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// File locking error.
    #[error("Lock error: {0}")]
    Lock(String),
    /// The path cannot host a sibling temp file.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// A handle to a file that is only ever replaced atomically.
///
/// Provides:
/// - **Atomicity**: updates are all-or-nothing via tmp file + atomic rename
/// - **Isolation**: an exclusive lock file serializes writers across processes
/// - **Durability**: explicit fsync before rename
#[derive(Debug, Clone)]
pub struct AtomicFile {
    path: PathBuf,
}

impl AtomicFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file.
    ///
    /// Content that is not valid UTF-8 is treated as damaged and read as an
    /// empty string, so callers fall back to their empty value.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(content))`: File exists
    /// - `Ok(None)`: File doesn't exist
    /// - `Err`: Failed to read
    pub fn read(&self) -> Result<Option<String>, AtomicFileError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match String::from_utf8(bytes) {
            Ok(content) => Ok(Some(content)),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "File is not valid UTF-8, ignoring its content"
                );
                Ok(Some(String::new()))
            }
        }
    }

    /// Replaces the file content atomically.
    pub fn write(&self, content: &str) -> Result<(), AtomicFileError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let _lock = FileLock::acquire(&self.path)?;

        // Write to temporary file in the same directory
        let tmp_path = self.temp_path()?;
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(content.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Deletes the file. A missing file is not an error.
    pub fn remove(&self) -> Result<(), AtomicFileError> {
        let _lock = FileLock::acquire(&self.path)?;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn temp_path(&self) -> Result<PathBuf, AtomicFileError> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| AtomicFileError::InvalidPath("path has no parent directory".into()))?;
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| AtomicFileError::InvalidPath("path has no file name".into()))?;

        Ok(parent.join(format!(".{}.tmp", file_name.to_string_lossy())))
    }
}

/// A file lock guard that releases the lock when dropped.
///
/// The lock file stays in place so every writer locks the same inode.
struct FileLock {
    #[allow(dead_code)]
    file: File,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self, AtomicFileError> {
        let lock_path = path.with_extension("lock");

        if let Some(parent) = lock_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        use fs2::FileExt;
        file.lock_exclusive()
            .map_err(|e| AtomicFileError::Lock(format!("Failed to acquire lock: {}", e)))?;

        Ok(FileLock { file })
    }
}
