//! Single entry point dispatching file operations to the right backend.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use mdvault_core::{
    path, ChangeCallback, DialogOptions, FileEntry, FileRef, StorageBackend, StorageError,
    StorageLocation, WatchHandle,
};
use tracing::{debug, info, instrument};

/// Routes every call to the local or remote backend by the descriptor's
/// storage location. Errors pass through untouched.
#[derive(Clone)]
pub struct UnifiedFileService {
    local: Arc<dyn StorageBackend>,
    remote: Arc<dyn StorageBackend>,
}

impl UnifiedFileService {
    pub fn new(local: Arc<dyn StorageBackend>, remote: Arc<dyn StorageBackend>) -> Self {
        Self { local, remote }
    }

    pub fn backend(&self, location: StorageLocation) -> &Arc<dyn StorageBackend> {
        match location {
            StorageLocation::Local => &self.local,
            StorageLocation::Remote => &self.remote,
        }
    }

    fn of(&self, file: &FileRef) -> &Arc<dyn StorageBackend> {
        self.backend(file.storage_location)
    }

    pub async fn read_file(&self, file: &FileRef) -> Result<Vec<u8>, StorageError> {
        self.of(file).read_file(&file.path).await
    }

    pub async fn read_text(&self, file: &FileRef) -> Result<String, StorageError> {
        self.of(file).read_text(&file.path).await
    }

    pub async fn write_file(&self, file: &FileRef, data: &[u8]) -> Result<(), StorageError> {
        self.of(file).write_file(&file.path, data).await
    }

    pub async fn write_text(&self, file: &FileRef, content: &str) -> Result<(), StorageError> {
        self.of(file).write_text(&file.path, content).await
    }

    pub async fn exists(&self, file: &FileRef) -> bool {
        self.of(file).exists(&file.path, Some(file.is_dir)).await
    }

    pub async fn stat(&self, file: &FileRef) -> Result<FileEntry, StorageError> {
        self.of(file).stat(&file.path, Some(file.is_dir)).await
    }

    pub async fn read_directory(
        &self,
        file: &FileRef,
        recursive: bool,
    ) -> Result<FileEntry, StorageError> {
        self.of(file).read_directory(&file.path, recursive).await
    }

    pub async fn create_directory(
        &self,
        file: &FileRef,
        recursive: bool,
    ) -> Result<(), StorageError> {
        self.of(file).create_directory(&file.path, recursive).await
    }

    pub async fn create_file(&self, file: &FileRef) -> Result<(), StorageError> {
        self.of(file).create_file(&file.path).await
    }

    /// Create a file or directory according to `file.is_dir`.
    pub async fn create(&self, file: &FileRef) -> Result<(), StorageError> {
        if file.is_dir {
            self.create_directory(file, false).await
        } else {
            self.create_file(file).await
        }
    }

    pub async fn delete(&self, file: &FileRef) -> Result<(), StorageError> {
        self.of(file).delete(&file.path, file.is_dir).await
    }

    /// Rename within the descriptor's own backend.
    pub async fn rename(&self, file: &FileRef, new_path: &str) -> Result<(), StorageError> {
        self.of(file).rename(&file.path, new_path).await
    }

    pub async fn watch(&self, file: &FileRef, callback: ChangeCallback) -> Option<WatchHandle> {
        self.of(file).watch(&file.path, callback).await
    }

    /// Native save picker of the local backend.
    pub async fn save_file_dialog(
        &self,
        options: DialogOptions,
    ) -> Result<Option<String>, StorageError> {
        self.local.save_file_dialog(options).await
    }

    /// Native open picker of the local backend, resolved to an entry.
    pub async fn open_file_dialog(
        &self,
        options: DialogOptions,
    ) -> Result<Option<FileEntry>, StorageError> {
        let directory = options.directory;
        let Some(picked) = self.local.open_file_dialog(options).await? else {
            return Ok(None);
        };
        let file = FileRef::local(picked);
        let entry = if directory {
            self.local.read_directory(&file.path, false).await?
        } else {
            self.local.stat(&file.path, Some(false)).await?
        };
        Ok(Some(entry))
    }

    pub async fn reveal(&self, file: &FileRef) -> Result<(), StorageError> {
        self.of(file).reveal(&file.path).await
    }

    /// Copy `source` to `target`, possibly across backends.
    ///
    /// Files on the same backend use its native copy. Everything else is
    /// copied by reading whole files into memory and writing them out,
    /// directories depth-first and one entry at a time.
    #[instrument(skip(self), level = "debug", fields(from = %source.path, to = %target.path))]
    pub async fn copy_across_storage(
        &self,
        source: &FileRef,
        target: &FileRef,
    ) -> Result<(), StorageError> {
        self.copy_entry(source.clone(), target.clone()).await
    }

    fn copy_entry(&self, source: FileRef, target: FileRef) -> BoxFuture<'_, Result<(), StorageError>> {
        async move {
            let from = self.of(&source);
            let to = self.of(&target);

            if !source.is_dir {
                if source.storage_location == target.storage_location {
                    return from.copy_file(&source.path, &target.path).await;
                }
                let data = from.read_file(&source.path).await?;
                to.write_file(&target.path, &data).await?;
                debug!(
                    "Copied {} bytes {}:{} -> {}:{}",
                    data.len(),
                    source.storage_location,
                    source.path,
                    target.storage_location,
                    target.path
                );
                return Ok(());
            }

            let listing = from.read_directory(&source.path, false).await?;
            if !to.exists(&target.path, Some(true)).await {
                to.create_directory(&target.path, true).await?;
            }
            for child in listing.children() {
                let child_target = FileRef {
                    path: path::join(&[&target.path, &child.name]),
                    storage_location: target.storage_location,
                    is_dir: child.is_dir,
                };
                self.copy_entry(child.file_ref(), child_target).await?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Move `source` to `target`.
    ///
    /// Within one backend this is a rename. Across backends it is a copy
    /// followed by deleting the source, which is not atomic: a failure
    /// between the two steps leaves both copies in place.
    #[instrument(skip(self), level = "debug", fields(from = %source.path, to = %target.path))]
    pub async fn move_across_storage(
        &self,
        source: &FileRef,
        target: &FileRef,
    ) -> Result<(), StorageError> {
        if source.storage_location == target.storage_location {
            return self.rename(source, &target.path).await;
        }
        let target = FileRef {
            is_dir: source.is_dir,
            ..target.clone()
        };
        self.copy_across_storage(source, &target).await?;
        self.delete(source).await?;
        info!(
            "Moved {}:{} to {}:{}",
            source.storage_location, source.path, target.storage_location, target.path
        );
        Ok(())
    }
}
