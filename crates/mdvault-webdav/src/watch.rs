use std::sync::Arc;
use std::time::Duration;

use mdvault_core::{ChangeCallback, WatchHandle};
use tracing::debug;

use crate::client::{DavResource, WebDavClient};

/// Observable state of a watched resource.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RemoteSnapshot {
    etag: Option<String>,
    size: u64,
    last_modified: i64,
    /// `(name, etag, last_modified)` of each child for collections
    children: Vec<(String, Option<String>, i64)>,
}

impl RemoteSnapshot {
    fn of(resource: &DavResource, children: &[DavResource]) -> Self {
        let mut children: Vec<_> = children
            .iter()
            .map(|c| (c.name.clone(), c.etag.clone(), c.last_modified))
            .collect();
        children.sort();
        Self {
            etag: resource.etag.clone(),
            size: resource.size,
            last_modified: resource.last_modified,
            children,
        }
    }

    /// Compare snapshots. Prefers the ETag, falls back to size and mtime.
    pub(crate) fn has_changed(old: &Self, new: &Self) -> bool {
        if old.children != new.children {
            return true;
        }
        if let (Some(old_etag), Some(new_etag)) = (&old.etag, &new.etag) {
            return old_etag != new_etag;
        }
        old.size != new.size || old.last_modified != new.last_modified
    }
}

async fn take_snapshot(client: &WebDavClient, path: &str) -> Option<RemoteSnapshot> {
    let resource = match client.stat(path, false).await {
        Ok(r) => r,
        Err(e) => {
            debug!("Poll of {} failed: {}", path, e);
            return None;
        }
    };
    let children = if resource.is_dir {
        client.list(path).await.unwrap_or_default()
    } else {
        Vec::new()
    };
    Some(RemoteSnapshot::of(&resource, &children))
}

/// Poll `path` every `interval` and fire `callback` whenever its snapshot
/// changes. A failed poll (including the resource disappearing) counts as a
/// change once, then polling carries on.
pub(crate) fn poll_path(
    client: Arc<WebDavClient>,
    path: String,
    interval: Duration,
    callback: ChangeCallback,
) -> WatchHandle {
    let task = tokio::spawn(async move {
        let mut known = take_snapshot(&client, &path).await;
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let current = take_snapshot(&client, &path).await;
            let changed = match (&known, &current) {
                (Some(old), Some(new)) => RemoteSnapshot::has_changed(old, new),
                (None, None) => false,
                _ => true,
            };
            if changed {
                debug!("Detected remote change in {}", path);
                callback();
            }
            known = current;
        }
    });

    WatchHandle::new(move || task.abort())
}
