use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use mdvault_core::{
    sort_entries, ChangeCallback, FileEntry, IgnoreFilter, IgnorePredicate, StorageBackend,
    StorageError, StorageLocation, WatchHandle,
};
use tracing::{debug, info, instrument, warn};

use crate::client::{DavResource, WebDavAuth, WebDavClient};
use crate::watch::poll_path;

/// Default interval between remote watch polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Server the backend is currently connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub url: String,
    pub username: Option<String>,
}

/// Storage backend over a WebDAV server.
///
/// Every operation fails with [`StorageError::NotConnected`] until
/// [`RemoteBackend::connect`] succeeds. Watches poll; they are not real-time.
pub struct RemoteBackend {
    client: RwLock<Option<Arc<WebDavClient>>>,
    ignore: IgnorePredicate,
    poll_interval: Duration,
}

impl Default for RemoteBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteBackend {
    pub fn new() -> Self {
        Self {
            client: RwLock::new(None),
            ignore: IgnoreFilter::for_location(StorageLocation::Remote).into_predicate(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_ignore(mut self, ignore: IgnorePredicate) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Stat the server root once and keep the credentials on
    /// success. Returns `false` when the stat fails.
    #[instrument(skip(self, password), level = "debug")]
    pub async fn connect(
        &self,
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<bool, StorageError> {
        let client = WebDavClient::new(url, WebDavAuth::basic(username, password)?)?;
        match client.stat("", true).await {
            Ok(_) => {
                info!("Connected to WebDAV server {}", client.base_url());
                *self.client.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(client));
                Ok(true)
            }
            Err(e) => {
                warn!("WebDAV connection to {} failed: {}", url, e);
                Ok(false)
            }
        }
    }

    /// Same check as [`connect`](Self::connect) without storing anything.
    #[instrument(skip(password), level = "debug")]
    pub async fn test_connection(
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<bool, StorageError> {
        let client = WebDavClient::new(url, WebDavAuth::basic(username, password)?)?;
        Ok(client.stat("", true).await.is_ok())
    }

    pub fn disconnect(&self) {
        if self
            .client
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
        {
            info!("Disconnected from WebDAV server");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|c| ConnectionInfo {
                url: c.base_url().to_string(),
                username: c.auth().username().map(str::to_string),
            })
    }

    fn client(&self) -> Result<Arc<WebDavClient>, StorageError> {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(StorageError::NotConnected)
    }

    fn to_entry(resource: DavResource) -> FileEntry {
        FileEntry {
            path: resource.href,
            name: resource.name,
            storage_location: StorageLocation::Remote,
            is_dir: resource.is_dir,
            size: resource.size,
            last_modified: resource.last_modified,
            version: resource.etag,
            readonly: false,
            is_root: false,
            children: resource.is_dir.then(Vec::new),
        }
    }

    /// Children of `path`, walked sequentially when `recursive` to keep one
    /// request in flight.
    fn list<'a>(
        &'a self,
        client: &'a WebDavClient,
        path: &'a str,
        recursive: bool,
    ) -> BoxFuture<'a, Result<Vec<FileEntry>, StorageError>> {
        async move {
            let resources = client.list(path).await?;
            let mut entries = Vec::with_capacity(resources.len());
            for resource in resources {
                if (self.ignore)(&resource.name) {
                    continue;
                }
                let mut entry = Self::to_entry(resource);
                if recursive && entry.is_dir {
                    match self.list(client, &entry.path, true).await {
                        Ok(children) => entry.children = Some(children),
                        Err(e) => warn!("Failed to list {}: {}", entry.path, e),
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
impl StorageBackend for RemoteBackend {
    fn location(&self) -> StorageLocation {
        StorageLocation::Remote
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.client()?.get(path).await
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        self.client()?.put(path, data).await
    }

    async fn exists(&self, path: &str, is_dir: Option<bool>) -> bool {
        let Ok(client) = self.client() else {
            return false;
        };
        match client.stat(path, is_dir.unwrap_or(false)).await {
            Ok(resource) => is_dir.is_none_or(|dir| dir == resource.is_dir),
            Err(_) => false,
        }
    }

    async fn stat(&self, path: &str, is_dir: Option<bool>) -> Result<FileEntry, StorageError> {
        let resource = self.client()?.stat(path, is_dir.unwrap_or(false)).await?;
        Ok(Self::to_entry(resource))
    }

    #[instrument(skip(self), level = "debug")]
    async fn read_directory(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<FileEntry, StorageError> {
        let client = self.client()?;
        let resource = client.stat(path, true).await?;
        if !resource.is_dir {
            return Err(StorageError::TypeMismatch(format!(
                "{} is not a collection",
                resource.href
            )));
        }
        let mut entry = Self::to_entry(resource);
        let children = self.list(&client, &entry.path, recursive).await?;
        debug!("Listed {} entries in {}", children.len(), entry.path);
        entry.children = Some(children);
        Ok(entry)
    }

    async fn create_directory(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        self.client()?.mkcol(path, recursive).await
    }

    async fn delete(&self, path: &str, is_dir: bool) -> Result<(), StorageError> {
        self.client()?.delete(path, is_dir).await
    }

    async fn rename(&self, path: &str, new_path: &str) -> Result<(), StorageError> {
        let client = self.client()?;
        let is_dir = client.stat(path, false).await?.is_dir;
        client.move_to(path, new_path, is_dir).await
    }

    async fn copy_file(&self, path: &str, dest_path: &str) -> Result<(), StorageError> {
        self.client()?.copy_to(path, dest_path, false).await
    }

    async fn watch(&self, path: &str, callback: ChangeCallback) -> Option<WatchHandle> {
        let client = match self.client() {
            Ok(c) => c,
            Err(e) => {
                warn!("Cannot watch {}: {}", path, e);
                return None;
            }
        };
        debug!(
            "Polling {} every {}s",
            path,
            self.poll_interval.as_secs_f32()
        );
        Some(poll_path(
            client,
            path.to_string(),
            self.poll_interval,
            callback,
        ))
    }
}
