use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entry::{FileEntry, StorageLocation};
use crate::error::StorageError;

/// Callback fired when a watched path changes.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Keeps a watch alive. Dropping the handle (or calling [`WatchHandle::stop`])
/// stops notifications.
pub struct WatchHandle {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchHandle {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.stop.is_some())
            .finish()
    }
}

/// Name/extension filter shown by a file picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogFilter {
    pub name: String,
    pub extensions: Vec<String>,
}

/// Options passed to the save/open file pickers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogOptions {
    pub title: Option<String>,
    #[serde(default)]
    pub filters: Vec<DialogFilter>,
    pub default_path: Option<String>,
    #[serde(default)]
    pub directory: bool,
}

/// Uniform contract for a place files live.
///
/// Paths are in the backend's own address space. Operations that only make
/// sense for one kind of storage have default implementations returning
/// [`StorageError::Unsupported`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which storage location this backend serves.
    fn location(&self) -> StorageLocation;

    /// Read the full contents of a file.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Read a file as UTF-8 text.
    async fn read_text(&self, path: &str) -> Result<String, StorageError> {
        let bytes = self.read_file(path).await?;
        String::from_utf8(bytes)
            .map_err(|e| StorageError::TypeMismatch(format!("{} is not UTF-8: {}", path, e)))
    }

    /// Create or overwrite a file. No partial write is ever observable.
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Create or overwrite a text file.
    async fn write_text(&self, path: &str, content: &str) -> Result<(), StorageError> {
        self.write_file(path, content.as_bytes()).await
    }

    /// Never fails; resolution errors read as `false`.
    async fn exists(&self, path: &str, is_dir: Option<bool>) -> bool;

    /// Metadata for a single object, children not populated.
    async fn stat(&self, path: &str, is_dir: Option<bool>) -> Result<FileEntry, StorageError>;

    /// List a directory. Depth 1 unless `recursive`, which fills nested children.
    async fn read_directory(&self, path: &str, recursive: bool)
        -> Result<FileEntry, StorageError>;

    async fn create_directory(&self, path: &str, recursive: bool) -> Result<(), StorageError>;

    /// Create an empty file.
    async fn create_file(&self, path: &str) -> Result<(), StorageError> {
        self.write_file(path, &[]).await
    }

    /// Delete a file, or a directory with everything under it.
    async fn delete(&self, path: &str, is_dir: bool) -> Result<(), StorageError>;

    async fn rename(&self, path: &str, new_path: &str) -> Result<(), StorageError>;

    async fn copy_file(&self, path: &str, dest_path: &str) -> Result<(), StorageError>;

    /// Best-effort change notification. Setup failures yield `None`.
    async fn watch(&self, path: &str, callback: ChangeCallback) -> Option<WatchHandle>;

    // ─────────────────────────────────────────────────────────────────────
    // Local-only operations
    // ─────────────────────────────────────────────────────────────────────

    /// Ask the user for a destination path.
    async fn save_file_dialog(
        &self,
        _options: DialogOptions,
    ) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unsupported(format!(
            "save dialog on {} storage",
            self.location()
        )))
    }

    /// Ask the user for one existing file or directory.
    async fn open_file_dialog(
        &self,
        _options: DialogOptions,
    ) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unsupported(format!(
            "open dialog on {} storage",
            self.location()
        )))
    }

    /// Show the path in the platform file manager.
    async fn reveal(&self, _path: &str) -> Result<(), StorageError> {
        Err(StorageError::Unsupported(format!(
            "reveal on {} storage",
            self.location()
        )))
    }
}
