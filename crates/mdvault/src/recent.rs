//! Recently opened files and folders.
//!
//! Persisted as one JSON document, `{"recentFiles": [...]}`, on the local
//! backend and loaded on first use.

use std::sync::Arc;

use chrono::Utc;
use mdvault_core::{path, FileRef, StorageBackend, StorageError, StorageLocation};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Unpinned entries kept once the list overflows.
pub const MAX_RECENT_FILES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentFile {
    pub path: String,
    pub storage_location: StorageLocation,
    pub is_dir: bool,
    /// Unix milliseconds
    pub last_opened: i64,
    pub pinned: bool,
}

impl RecentFile {
    pub fn file_ref(&self) -> FileRef {
        FileRef {
            path: self.path.clone(),
            storage_location: self.storage_location,
            is_dir: self.is_dir,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentDocument {
    #[serde(default)]
    recent_files: Vec<RecentFile>,
}

pub struct RecentStore {
    backend: Arc<dyn StorageBackend>,
    file: String,
    /// `None` until read from the backend
    entries: Mutex<Option<Vec<RecentFile>>>,
}

impl RecentStore {
    pub fn new(backend: Arc<dyn StorageBackend>, file: impl Into<String>) -> Self {
        Self {
            backend,
            file: file.into(),
            entries: Mutex::new(None),
        }
    }

    /// Record that `file` was opened.
    ///
    /// A known path only has its timestamp bumped. A new path goes to the
    /// front; past [`MAX_RECENT_FILES`] the oldest unpinned entries are
    /// dropped while every pinned one is kept.
    #[instrument(skip(self), level = "debug", fields(path = %file.path))]
    pub async fn add(&self, file: &FileRef) -> Result<(), StorageError> {
        let mut guard = self.entries.lock().await;
        let entries = self.loaded(&mut guard).await?;

        let now = next_timestamp(entries.as_slice());
        if let Some(existing) = entries.iter_mut().find(|f| f.path == file.path) {
            existing.last_opened = now;
        } else {
            entries.insert(
                0,
                RecentFile {
                    path: file.path.clone(),
                    storage_location: file.storage_location,
                    is_dir: file.is_dir,
                    last_opened: now,
                    pinned: false,
                },
            );
            if entries.len() > MAX_RECENT_FILES {
                let (mut kept, mut unpinned): (Vec<_>, Vec<_>) =
                    entries.drain(..).partition(|f| f.pinned);
                unpinned.sort_by(|a, b| b.last_opened.cmp(&a.last_opened));
                unpinned.truncate(MAX_RECENT_FILES);
                kept.extend(unpinned);
                *entries = kept;
            }
        }
        self.persist(entries).await
    }

    /// Flip the pin of `path`. Returns the new state, `None` if unknown.
    pub async fn toggle_pin(&self, path: &str) -> Result<Option<bool>, StorageError> {
        let mut guard = self.entries.lock().await;
        let entries = self.loaded(&mut guard).await?;
        let Some(file) = entries.iter_mut().find(|f| f.path == path) else {
            return Ok(None);
        };
        file.pinned = !file.pinned;
        let pinned = file.pinned;
        self.persist(entries).await?;
        Ok(Some(pinned))
    }

    pub async fn remove(&self, path: &str) -> Result<bool, StorageError> {
        let mut guard = self.entries.lock().await;
        let entries = self.loaded(&mut guard).await?;
        let before = entries.len();
        entries.retain(|f| f.path != path);
        if entries.len() == before {
            return Ok(false);
        }
        self.persist(entries).await?;
        Ok(true)
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        let mut guard = self.entries.lock().await;
        let entries = self.loaded(&mut guard).await?;
        entries.clear();
        self.persist(entries).await
    }

    /// Pinned entries first, then most recently opened first.
    pub async fn sorted(&self) -> Result<Vec<RecentFile>, StorageError> {
        let mut guard = self.entries.lock().await;
        let mut entries = self.loaded(&mut guard).await?.clone();
        entries.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then_with(|| b.last_opened.cmp(&a.last_opened))
        });
        Ok(entries)
    }

    async fn loaded<'a>(
        &self,
        slot: &'a mut Option<Vec<RecentFile>>,
    ) -> Result<&'a mut Vec<RecentFile>, StorageError> {
        if slot.is_none() {
            let document = match self.backend.read_text(&self.file).await {
                Ok(text) => serde_json::from_str::<RecentDocument>(&text)?,
                Err(e) if e.is_not_found() => RecentDocument::default(),
                Err(e) => return Err(e),
            };
            debug!("Loaded {} recent files", document.recent_files.len());
            *slot = Some(document.recent_files);
        }
        Ok(slot.get_or_insert_with(Vec::new))
    }

    async fn persist(&self, entries: &[RecentFile]) -> Result<(), StorageError> {
        let json = serde_json::to_string(&serde_json::json!({ "recentFiles": entries }))?;
        self.backend
            .create_directory(&path::dirname(&self.file), true)
            .await?;
        self.backend.write_text(&self.file, &json).await
    }
}

/// Current time, nudged past every recorded timestamp so ordering never
/// depends on clock resolution.
fn next_timestamp(entries: &[RecentFile]) -> i64 {
    let now = Utc::now().timestamp_millis();
    entries
        .iter()
        .map(|f| f.last_opened + 1)
        .max()
        .map_or(now, |next| next.max(now))
}
