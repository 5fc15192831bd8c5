use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use mdvault_core::{
    local_version, sort_entries, ChangeCallback, DialogOptions, FileEntry, IgnoreFilter,
    IgnorePredicate, StorageBackend, StorageError, StorageLocation, WatchHandle,
};
use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::picker::{reveal_in_file_manager, FilePicker};
use crate::watch::watch_path;

/// Storage backend over the local filesystem.
///
/// Writes go through a sibling temp file and a rename, so readers never see
/// a half-written document. Versions are `"{mtime_ms}-{size}"`.
pub struct LocalBackend {
    ignore: IgnorePredicate,
    picker: Option<Arc<dyn FilePicker>>,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            ignore: IgnoreFilter::for_location(StorageLocation::Local).into_predicate(),
            picker: None,
        }
    }

    pub fn with_ignore(mut self, ignore: IgnorePredicate) -> Self {
        self.ignore = ignore;
        self
    }

    /// Attach the native picker used by the save/open dialogs.
    pub fn with_picker(mut self, picker: Arc<dyn FilePicker>) -> Self {
        self.picker = Some(picker);
        self
    }

    fn temp_path_for(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
    }

    fn entry_from_metadata(path: &Path, metadata: &std::fs::Metadata) -> FileEntry {
        let is_dir = metadata.is_dir();
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let size = if is_dir { 0 } else { metadata.len() };

        FileEntry {
            path: path.to_string_lossy().to_string(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string_lossy().to_string()),
            storage_location: StorageLocation::Local,
            is_dir,
            size,
            last_modified,
            version: (!is_dir).then(|| local_version(last_modified, size)),
            readonly: metadata.permissions().readonly(),
            is_root: false,
            children: is_dir.then(Vec::new),
        }
    }

    fn list<'a>(
        &'a self,
        dir: &'a Path,
        recursive: bool,
    ) -> BoxFuture<'a, Result<Vec<FileEntry>, StorageError>> {
        async move {
            let display = dir.display().to_string();
            let mut read_dir = fs::read_dir(dir)
                .await
                .map_err(|e| StorageError::from_io(e, &display))?;

            let mut entries = Vec::new();
            while let Some(item) = read_dir
                .next_entry()
                .await
                .map_err(|e| StorageError::from_io(e, &display))?
            {
                let name = item.file_name().to_string_lossy().to_string();
                if (self.ignore)(&name) {
                    continue;
                }

                let child_path = item.path();
                // Follows symlinks; dangling links are skipped.
                let metadata = match fs::metadata(&child_path).await {
                    Ok(m) => m,
                    Err(e) => {
                        debug!("Skipping {}: {}", child_path.display(), e);
                        continue;
                    }
                };

                let mut entry = Self::entry_from_metadata(&child_path, &metadata);
                if recursive && entry.is_dir {
                    match self.list(&child_path, true).await {
                        Ok(children) => entry.children = Some(children),
                        Err(e) => warn!("Failed to list {}: {}", child_path.display(), e),
                    }
                }
                entries.push(entry);
            }

            sort_entries(&mut entries);
            Ok(entries)
        }
        .boxed()
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn location(&self) -> StorageLocation {
        StorageLocation::Local
    }

    #[instrument(skip(self), level = "debug")]
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let data = fs::read(path)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;
        debug!("Read {} bytes from {}", data.len(), path);
        Ok(data)
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let file_path = Path::new(path);
        if fs::metadata(file_path).await.is_ok_and(|m| m.is_dir()) {
            return Err(StorageError::TypeMismatch(format!("{} is a directory", path)));
        }

        let temp_path = Self::temp_path_for(file_path);
        if let Err(e) = fs::write(&temp_path, data).await {
            return Err(StorageError::from_io(e, path));
        }
        if let Err(e) = fs::rename(&temp_path, file_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::from_io(e, path));
        }

        debug!("Wrote {} bytes to {}", data.len(), path);
        Ok(())
    }

    async fn exists(&self, path: &str, is_dir: Option<bool>) -> bool {
        match fs::metadata(path).await {
            Ok(metadata) => is_dir.is_none_or(|dir| dir == metadata.is_dir()),
            Err(_) => false,
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn stat(&self, path: &str, _is_dir: Option<bool>) -> Result<FileEntry, StorageError> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;
        Ok(Self::entry_from_metadata(Path::new(path), &metadata))
    }

    #[instrument(skip(self), level = "debug")]
    async fn read_directory(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<FileEntry, StorageError> {
        let dir = Path::new(path);
        let metadata = fs::metadata(dir)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;
        if !metadata.is_dir() {
            return Err(StorageError::TypeMismatch(format!(
                "{} is not a directory",
                path
            )));
        }

        let mut entry = Self::entry_from_metadata(dir, &metadata);
        let children = self.list(dir, recursive).await?;
        debug!("Listed {} entries in {}", children.len(), path);
        entry.children = Some(children);
        Ok(entry)
    }

    #[instrument(skip(self), level = "debug")]
    async fn create_directory(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        let result = if recursive {
            fs::create_dir_all(path).await
        } else {
            fs::create_dir(path).await
        };
        result.map_err(|e| StorageError::from_io(e, path))
    }

    #[instrument(skip(self), level = "debug")]
    async fn create_file(&self, path: &str) -> Result<(), StorageError> {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::from_io(e, path))
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, path: &str, is_dir: bool) -> Result<(), StorageError> {
        let result = if is_dir {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        };
        result.map_err(|e| StorageError::from_io(e, path))?;
        debug!("Deleted {}", path);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn rename(&self, path: &str, new_path: &str) -> Result<(), StorageError> {
        if fs::try_exists(new_path).await.unwrap_or(false) {
            return Err(StorageError::AlreadyExists(new_path.to_string()));
        }
        fs::rename(path, new_path)
            .await
            .map_err(|e| StorageError::from_io(e, path))
    }

    #[instrument(skip(self), level = "debug")]
    async fn copy_file(&self, path: &str, dest_path: &str) -> Result<(), StorageError> {
        let bytes = fs::copy(path, dest_path)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;
        debug!("Copied {} bytes from {} to {}", bytes, path, dest_path);
        Ok(())
    }

    async fn watch(&self, path: &str, callback: ChangeCallback) -> Option<WatchHandle> {
        watch_path(Path::new(path), callback)
    }

    async fn save_file_dialog(
        &self,
        options: DialogOptions,
    ) -> Result<Option<String>, StorageError> {
        match &self.picker {
            Some(picker) => picker.pick_save_path(options).await,
            None => Err(StorageError::Unsupported("no file picker attached".into())),
        }
    }

    async fn open_file_dialog(
        &self,
        options: DialogOptions,
    ) -> Result<Option<String>, StorageError> {
        match &self.picker {
            Some(picker) => picker.pick_open_path(options).await,
            None => Err(StorageError::Unsupported("no file picker attached".into())),
        }
    }

    async fn reveal(&self, path: &str) -> Result<(), StorageError> {
        let target = Path::new(path);
        if !fs::try_exists(target).await.unwrap_or(false) {
            return Err(StorageError::FileNotFound(path.to_string()));
        }
        reveal_in_file_manager(target)
    }
}
