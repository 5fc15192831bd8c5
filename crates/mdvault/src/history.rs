//! Snapshot history kept beside (not inside) the documents it tracks.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<bucket>/metadata.json   {"source": "<path>", "entries": [...]}
//! <root>/<bucket>/<id>            snapshot body, id ends with the file extension
//! ```
//!
//! `bucket` is the first 11 hex chars of SHA-256 of the logical path, or the
//! full 64-char digest when the short bucket already belongs to another path.

use std::sync::Arc;

use chrono::Utc;
use mdvault_core::{path, StorageBackend, StorageError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::locks::PathLocks;

const METADATA_FILE: &str = "metadata.json";
const BUCKET_PREFIX_LEN: usize = 11;
const ID_LEN: usize = 6;
const ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_-";

/// One recorded snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub id: String,
    /// Unix milliseconds
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionHistory {
    source: String,
    #[serde(default)]
    entries: Vec<VersionInfo>,
}

impl VersionHistory {
    fn empty(source: &str) -> Self {
        Self {
            source: source.to_string(),
            entries: Vec::new(),
        }
    }
}

/// Parameters of [`VersionHistoryStore::create_version`].
#[derive(Debug, Clone, Default)]
pub struct NewVersion<'a> {
    pub path: &'a str,
    pub content: &'a str,
    pub message: Option<String>,
    /// Entries kept after this snapshot; 0 keeps everything
    pub max_num: usize,
}

/// Bucketed snapshot store on top of any backend.
pub struct VersionHistoryStore {
    backend: Arc<dyn StorageBackend>,
    root: String,
    locks: PathLocks,
}

impl VersionHistoryStore {
    pub fn new(backend: Arc<dyn StorageBackend>, root: impl Into<String>) -> Self {
        Self {
            backend,
            root: path::normalize(&root.into()),
            locks: PathLocks::new(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Record `content` as the newest snapshot of `path`.
    ///
    /// The body is written before the metadata, so a listed version always
    /// has a body. Bodies of evicted entries are removed in the background.
    #[instrument(skip(self, new), level = "debug", fields(path = %new.path, data_len = new.content.len()))]
    pub async fn create_version(&self, new: NewVersion<'_>) -> Result<VersionInfo, StorageError> {
        let _guard = self.locks.lock(new.path).await;

        let (bucket, mut history) = self.load(new.path).await?;
        self.backend.create_directory(&bucket, true).await?;

        let extension = path::extname(new.path);
        let id = loop {
            let candidate = format!("{}{}", generate_id(), extension);
            if !history.entries.iter().any(|v| v.id == candidate) {
                break candidate;
            }
        };
        let version = VersionInfo {
            id: id.clone(),
            created_at: Utc::now().timestamp_millis(),
            message: new.message,
        };

        self.backend
            .write_text(&path::join(&[&bucket, &id]), new.content)
            .await?;

        history.entries.push(version.clone());
        let evicted: Vec<VersionInfo> =
            if new.max_num > 0 && history.entries.len() > new.max_num {
                let excess = history.entries.len() - new.max_num;
                history.entries.drain(..excess).collect()
            } else {
                Vec::new()
            };

        self.save(&bucket, &history).await?;
        self.delete_bodies(&bucket, evicted);

        info!("Created version {} for {}", id, new.path);
        Ok(version)
    }

    /// Snapshots of `path`, oldest first. Unknown paths have none.
    pub async fn list_versions(&self, path: &str) -> Result<Vec<VersionInfo>, StorageError> {
        let (_, history) = self.load(path).await?;
        Ok(history.entries)
    }

    /// Body of one snapshot. Unknown ids, missing bodies and unreadable
    /// metadata all read as `None`.
    pub async fn get_version(&self, path: &str, id: &str) -> Option<String> {
        let (bucket, history) = match self.load(path).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Failed to load history for {}: {}", path, e);
                return None;
            }
        };
        if !history.entries.iter().any(|v| v.id == id) {
            return None;
        }
        match self.backend.read_text(&path::join(&[&bucket, id])).await {
            Ok(content) => Some(content),
            Err(e) => {
                warn!("Failed to read version {} of {}: {}", id, path, e);
                None
            }
        }
    }

    /// Remove one snapshot. The entry is unlisted even if its body cannot
    /// be deleted. Returns the remaining entries.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete_version(
        &self,
        path: &str,
        id: &str,
    ) -> Result<Vec<VersionInfo>, StorageError> {
        let _guard = self.locks.lock(path).await;

        let (bucket, mut history) = self.load(path).await?;
        let index = history
            .entries
            .iter()
            .position(|v| v.id == id)
            .ok_or_else(|| StorageError::VersionNotFound(format!("{} of {}", id, path)))?;

        if let Err(e) = self
            .backend
            .delete(&path::join(&[&bucket, id]), false)
            .await
        {
            warn!("Failed to delete version body {}: {}", id, e);
        }

        history.entries.remove(index);
        self.save(&bucket, &history).await?;
        debug!("Deleted version {} of {}", id, path);
        Ok(history.entries)
    }

    /// Bucket directory that holds (or will hold) the history of `path`.
    pub async fn bucket_for(&self, path: &str) -> Result<String, StorageError> {
        Ok(self.load(path).await?.0)
    }

    /// Pick the bucket for `path` and load its metadata, empty when absent.
    async fn load(&self, source: &str) -> Result<(String, VersionHistory), StorageError> {
        let digest = hex::encode(Sha256::digest(source.as_bytes()));
        let primary = path::join(&[&self.root, &digest[..BUCKET_PREFIX_LEN]]);

        match self.read_metadata(&primary).await? {
            None => Ok((primary, VersionHistory::empty(source))),
            Some(history) if history.source == source => Ok((primary, history)),
            Some(other) => {
                debug!(
                    "Bucket {} belongs to {}, using full digest for {}",
                    primary, other.source, source
                );
                let full = path::join(&[&self.root, &digest]);
                let history = self
                    .read_metadata(&full)
                    .await?
                    .unwrap_or_else(|| VersionHistory::empty(source));
                Ok((full, history))
            }
        }
    }

    async fn read_metadata(&self, bucket: &str) -> Result<Option<VersionHistory>, StorageError> {
        let file = path::join(&[bucket, METADATA_FILE]);
        match self.backend.read_text(&file).await {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save(&self, bucket: &str, history: &VersionHistory) -> Result<(), StorageError> {
        let json = serde_json::to_string(history)?;
        self.backend
            .write_text(&path::join(&[bucket, METADATA_FILE]), &json)
            .await
    }

    fn delete_bodies(&self, bucket: &str, evicted: Vec<VersionInfo>) {
        if evicted.is_empty() {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let bucket = bucket.to_string();
        tokio::spawn(async move {
            for version in evicted {
                let body = path::join(&[&bucket, &version.id]);
                if let Err(e) = backend.delete(&body, false).await {
                    warn!("Failed to delete evicted version {}: {}", body, e);
                }
            }
        });
    }
}

fn generate_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect()
}
