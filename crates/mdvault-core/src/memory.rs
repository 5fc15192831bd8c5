//! In-memory storage backend.
//!
//! Holds every file and directory in a map keyed by normalized path. Useful
//! for tests and for scratch workspaces that must not touch the disk. It can
//! stand in for either storage location; with `StorageLocation::Remote` the
//! keys are usually URLs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{ChangeCallback, DialogOptions, StorageBackend, WatchHandle};
use crate::entry::{sort_entries, FileEntry, StorageLocation};
use crate::error::StorageError;
use crate::ignore::{IgnoreFilter, IgnorePredicate};
use crate::path;

#[derive(Debug, Clone)]
enum Node {
    File {
        data: Vec<u8>,
        modified: i64,
        revision: u64,
    },
    Dir {
        modified: i64,
    },
}

type WatcherMap = HashMap<u64, (String, ChangeCallback)>;

/// Ephemeral backend kept entirely in memory.
///
/// File versions are `r<revision>` where the revision is a counter bumped on
/// every write, so any write through this backend is visible as a version
/// change.
pub struct MemoryBackend {
    location: StorageLocation,
    nodes: RwLock<BTreeMap<String, Node>>,
    revision: AtomicU64,
    ignore: IgnorePredicate,
    watchers: Arc<RwLock<WatcherMap>>,
    next_watch_id: AtomicU64,
    write_delay: RwLock<Option<Duration>>,
    fail_writes: AtomicBool,
    fail_stats: AtomicBool,
    active_writes: AtomicUsize,
    peak_writes: AtomicUsize,
    dialog_path: RwLock<Option<String>>,
}

impl MemoryBackend {
    /// Empty backend with the root directory `/`.
    pub fn new(location: StorageLocation) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir { modified: now_ms() });
        Self {
            location,
            nodes: RwLock::new(nodes),
            revision: AtomicU64::new(0),
            ignore: IgnoreFilter::for_location(location).into_predicate(),
            watchers: Arc::new(RwLock::new(HashMap::new())),
            next_watch_id: AtomicU64::new(1),
            write_delay: RwLock::new(None),
            fail_writes: AtomicBool::new(false),
            fail_stats: AtomicBool::new(false),
            active_writes: AtomicUsize::new(0),
            peak_writes: AtomicUsize::new(0),
            dialog_path: RwLock::new(None),
        }
    }

    pub fn with_ignore(mut self, ignore: IgnorePredicate) -> Self {
        self.ignore = ignore;
        self
    }

    /// Insert a file synchronously, creating missing parents.
    pub fn seed(&self, path: &str, data: impl AsRef<[u8]>) {
        let key = path::normalize(path);
        let mut nodes = self.write_nodes();
        Self::ensure_parents(&mut nodes, &key);
        let revision = self.next_revision();
        nodes.insert(
            key,
            Node::File {
                data: data.as_ref().to_vec(),
                modified: now_ms(),
                revision,
            },
        );
    }

    /// Insert a directory synchronously, creating missing parents.
    pub fn seed_dir(&self, path: &str) {
        let key = path::normalize(path);
        let mut nodes = self.write_nodes();
        Self::ensure_parents(&mut nodes, &key);
        nodes
            .entry(key)
            .or_insert(Node::Dir { modified: now_ms() });
    }

    /// Delay every write by `delay`, to widen interleaving windows.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self
            .write_delay
            .write()
            .unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Make writes fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `stat` fail with an I/O error.
    pub fn set_fail_stats(&self, fail: bool) {
        self.fail_stats.store(fail, Ordering::SeqCst);
    }

    /// Answer save dialogs with `path`. Without one they are unsupported.
    pub fn set_dialog_path(&self, path: Option<String>) {
        *self
            .dialog_path
            .write()
            .unwrap_or_else(|e| e.into_inner()) = path;
    }

    /// Highest number of writes ever observed in flight at once.
    pub fn peak_concurrent_writes(&self) -> usize {
        self.peak_writes.load(Ordering::SeqCst)
    }

    pub fn file_count(&self) -> usize {
        self.read_nodes()
            .values()
            .filter(|n| matches!(n, Node::File { .. }))
            .count()
    }

    fn read_nodes(&self) -> RwLockReadGuard<'_, BTreeMap<String, Node>> {
        self.nodes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_nodes(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Node>> {
        self.nodes.write().unwrap_or_else(|e| e.into_inner())
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn ensure_parents(nodes: &mut BTreeMap<String, Node>, key: &str) {
        let mut current = path::dirname(key);
        loop {
            if current == "." || current.is_empty() {
                break;
            }
            nodes
                .entry(current.clone())
                .or_insert(Node::Dir { modified: now_ms() });
            let parent = path::dirname(&current);
            if parent == current {
                break;
            }
            current = parent;
        }
    }

    fn parent_exists(nodes: &BTreeMap<String, Node>, key: &str) -> bool {
        let parent = path::dirname(key);
        parent == key || matches!(nodes.get(&parent), Some(Node::Dir { .. }))
    }

    fn is_descendant(key: &str, ancestor: &str) -> bool {
        if ancestor == "/" {
            return key != "/" && key.starts_with('/');
        }
        key.strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
    }

    fn entry_for(&self, key: &str, node: &Node) -> FileEntry {
        match node {
            Node::File {
                data,
                modified,
                revision,
            } => FileEntry {
                path: key.to_string(),
                name: path::filename(key),
                storage_location: self.location,
                is_dir: false,
                size: data.len() as u64,
                last_modified: *modified,
                version: Some(format!("r{}", revision)),
                readonly: false,
                is_root: false,
                children: None,
            },
            Node::Dir { modified } => FileEntry {
                path: key.to_string(),
                name: path::filename(key),
                storage_location: self.location,
                is_dir: true,
                size: 0,
                last_modified: *modified,
                version: None,
                readonly: false,
                is_root: false,
                children: Some(Vec::new()),
            },
        }
    }

    fn list(&self, nodes: &BTreeMap<String, Node>, key: &str, recursive: bool) -> Vec<FileEntry> {
        let mut children: Vec<FileEntry> = nodes
            .iter()
            .filter(|(child, _)| child.as_str() != key && path::dirname(child) == key)
            .filter(|(child, _)| !(self.ignore)(&path::filename(child)))
            .map(|(child, node)| {
                let mut entry = self.entry_for(child, node);
                if recursive && entry.is_dir {
                    entry.children = Some(self.list(nodes, child, true));
                }
                entry
            })
            .collect();
        sort_entries(&mut children);
        children
    }

    fn notify(&self, key: &str) {
        let parent = path::dirname(key);
        let callbacks: Vec<ChangeCallback> = self
            .watchers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|(watched, _)| watched == key || *watched == parent)
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback();
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(StorageLocation::Local)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn location(&self) -> StorageLocation {
        self.location
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let key = path::normalize(path);
        match self.read_nodes().get(&key) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Dir { .. }) => Err(StorageError::TypeMismatch(format!(
                "{} is a directory",
                key
            ))),
            None => Err(StorageError::FileNotFound(key)),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let key = path::normalize(path);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(format!("{}: write refused", key)));
        }

        let in_flight = self.active_writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_writes.fetch_max(in_flight, Ordering::SeqCst);
        let delay = *self.write_delay.read().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let mut nodes = self.write_nodes();
            if matches!(nodes.get(&key), Some(Node::Dir { .. })) {
                Err(StorageError::TypeMismatch(format!("{} is a directory", key)))
            } else if !Self::parent_exists(&nodes, &key) {
                Err(StorageError::FileNotFound(path::dirname(&key)))
            } else {
                let revision = self.next_revision();
                nodes.insert(
                    key.clone(),
                    Node::File {
                        data: data.to_vec(),
                        modified: now_ms(),
                        revision,
                    },
                );
                Ok(())
            }
        };
        self.active_writes.fetch_sub(1, Ordering::SeqCst);
        if result.is_ok() {
            self.notify(&key);
        }
        result
    }

    async fn exists(&self, path: &str, is_dir: Option<bool>) -> bool {
        let key = path::normalize(path);
        match (self.read_nodes().get(&key), is_dir) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(Node::Dir { .. }), Some(dir)) => dir,
            (Some(Node::File { .. }), Some(dir)) => !dir,
        }
    }

    async fn stat(&self, path: &str, _is_dir: Option<bool>) -> Result<FileEntry, StorageError> {
        let key = path::normalize(path);
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(StorageError::Io(format!("{}: stat refused", key)));
        }
        let nodes = self.read_nodes();
        let node = nodes
            .get(&key)
            .ok_or_else(|| StorageError::FileNotFound(key.clone()))?;
        Ok(self.entry_for(&key, node))
    }

    async fn read_directory(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<FileEntry, StorageError> {
        let key = path::normalize(path);
        let nodes = self.read_nodes();
        let node = nodes
            .get(&key)
            .ok_or_else(|| StorageError::FileNotFound(key.clone()))?;
        if !matches!(node, Node::Dir { .. }) {
            return Err(StorageError::TypeMismatch(format!(
                "{} is not a directory",
                key
            )));
        }
        let mut entry = self.entry_for(&key, node);
        entry.children = Some(self.list(&nodes, &key, recursive));
        Ok(entry)
    }

    async fn create_directory(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        let key = path::normalize(path);
        {
            let mut nodes = self.write_nodes();
            match nodes.get(&key) {
                Some(Node::Dir { .. }) if recursive => return Ok(()),
                Some(_) => return Err(StorageError::AlreadyExists(key)),
                None => {}
            }
            if recursive {
                Self::ensure_parents(&mut nodes, &key);
            } else if !Self::parent_exists(&nodes, &key) {
                return Err(StorageError::FileNotFound(path::dirname(&key)));
            }
            nodes.insert(key.clone(), Node::Dir { modified: now_ms() });
        }
        self.notify(&key);
        Ok(())
    }

    async fn delete(&self, path: &str, _is_dir: bool) -> Result<(), StorageError> {
        let key = path::normalize(path);
        {
            let mut nodes = self.write_nodes();
            if nodes.remove(&key).is_none() {
                return Err(StorageError::FileNotFound(key));
            }
            nodes.retain(|k, _| !Self::is_descendant(k, &key));
        }
        self.notify(&key);
        Ok(())
    }

    async fn rename(&self, path: &str, new_path: &str) -> Result<(), StorageError> {
        let from = path::normalize(path);
        let to = path::normalize(new_path);
        {
            let mut nodes = self.write_nodes();
            if !nodes.contains_key(&from) {
                return Err(StorageError::FileNotFound(from));
            }
            if nodes.contains_key(&to) {
                return Err(StorageError::AlreadyExists(to));
            }
            if !Self::parent_exists(&nodes, &to) {
                return Err(StorageError::FileNotFound(path::dirname(&to)));
            }
            let moved: Vec<String> = nodes
                .keys()
                .filter(|k| **k == from || Self::is_descendant(k, &from))
                .cloned()
                .collect();
            for old in moved {
                if let Some(node) = nodes.remove(&old) {
                    let new_key = format!("{}{}", to, &old[from.len()..]);
                    nodes.insert(new_key, node);
                }
            }
        }
        self.notify(&from);
        self.notify(&to);
        Ok(())
    }

    async fn copy_file(&self, path: &str, dest_path: &str) -> Result<(), StorageError> {
        let data = self.read_file(path).await?;
        self.write_file(dest_path, &data).await
    }

    async fn watch(&self, path: &str, callback: ChangeCallback) -> Option<WatchHandle> {
        let id = self.next_watch_id.fetch_add(1, Ordering::SeqCst);
        self.watchers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, (path::normalize(path), callback));
        let watchers = Arc::clone(&self.watchers);
        Some(WatchHandle::new(move || {
            watchers
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
        }))
    }

    async fn save_file_dialog(
        &self,
        _options: DialogOptions,
    ) -> Result<Option<String>, StorageError> {
        let answer = self
            .dialog_path
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match answer {
            Some(path) => Ok(Some(path)),
            None => Err(StorageError::Unsupported(format!(
                "save dialog on {} storage",
                self.location
            ))),
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
