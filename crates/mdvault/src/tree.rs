//! In-memory index of every opened file tree.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use mdvault_core::{path, sort_entries, FileEntry};
use tracing::debug;

#[derive(Debug, Clone)]
struct Node {
    /// Entry with `children` emptied; the structure lives in `children`.
    entry: FileEntry,
    children: Vec<String>,
}

#[derive(Debug, Default)]
struct TreeState {
    nodes: HashMap<String, Node>,
    roots: Vec<String>,
    expanded: Vec<String>,
}

impl TreeState {
    /// Index `entry` and its loaded children. Each child replaces whatever
    /// subtree was indexed at its path, and registered roots keep their
    /// decoration wherever they reappear.
    fn insert(&mut self, entry: &FileEntry) {
        let children: Vec<String> = entry.children().iter().map(|c| c.path.clone()).collect();
        for child in entry.children() {
            self.remove_subtree(&child.path);
            self.insert(child);
        }
        let mut flat = entry.without_children();
        if self.is_root(&flat.path) && !flat.is_root {
            decorate_root(&mut flat);
        }
        self.nodes.insert(
            entry.path.clone(),
            Node {
                entry: flat,
                children,
            },
        );
    }

    /// Hook `path` under its parent if the parent is indexed.
    fn link(&mut self, path: &str) {
        let parent = path::dirname(path);
        if parent == path || !self.nodes.contains_key(path) {
            return;
        }
        let child_entries: Option<Vec<FileEntry>> = {
            let Some(node) = self.nodes.get(&parent) else {
                return;
            };
            if !node.entry.is_dir || node.children.iter().any(|c| c == path) {
                return;
            }
            let mut paths = node.children.clone();
            paths.push(path.to_string());
            Some(
                paths
                    .iter()
                    .filter_map(|p| self.nodes.get(p).map(|n| n.entry.clone()))
                    .collect(),
            )
        };
        if let (Some(mut entries), Some(node)) = (child_entries, self.nodes.get_mut(&parent)) {
            sort_entries(&mut entries);
            node.children = entries.into_iter().map(|e| e.path).collect();
        }
    }

    fn unlink(&mut self, path: &str) {
        let parent = path::dirname(path);
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.retain(|c| c != path);
        }
    }

    /// Drop `path` and every descendant. Returns the removed subtree.
    fn remove_subtree(&mut self, path: &str) -> Option<FileEntry> {
        let node = self.nodes.remove(path)?;
        let mut entry = node.entry;
        if entry.is_dir {
            entry.children = Some(
                node.children
                    .iter()
                    .filter_map(|child| self.remove_subtree(child))
                    .collect(),
            );
        }
        Some(entry)
    }

    fn build(&self, path: &str) -> Option<FileEntry> {
        let node = self.nodes.get(path)?;
        let mut entry = node.entry.clone();
        if entry.is_dir {
            entry.children = Some(
                node.children
                    .iter()
                    .filter_map(|child| self.build(child))
                    .collect(),
            );
        }
        Some(entry)
    }

    fn is_root(&self, path: &str) -> bool {
        self.roots.iter().any(|r| r == path)
    }
}

fn decorate_root(entry: &mut FileEntry) {
    entry.is_root = true;
    entry.name = format!("{}({})", entry.name, entry.path);
}

/// Path-keyed index of loaded entries.
///
/// Each path maps to exactly one entry. Every mutation that replaces a
/// subtree removes the old one completely first, so no stale descendant
/// survives a refresh. All methods are synchronous.
#[derive(Debug, Default)]
pub struct FileTreeCache {
    state: RwLock<TreeState>,
}

impl FileTreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, TreeState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TreeState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace each entry together with its loaded children.
    pub fn set(&self, entries: &[FileEntry]) {
        let mut state = self.write();
        for entry in entries {
            state.remove_subtree(&entry.path);
            state.insert(entry);
            state.link(&entry.path);
        }
    }

    /// Entry at `path` with its indexed subtree.
    pub fn get(&self, path: &str) -> Option<FileEntry> {
        self.read().build(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.read().nodes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().nodes.is_empty()
    }

    /// Open `root` as a tree.
    ///
    /// Returns `false` without changes when the path is already indexed.
    /// The contents are always indexed, but the entry is only registered as
    /// a root when it neither contains nor lies inside an existing root.
    pub fn load_file_tree(&self, root: FileEntry) -> bool {
        let mut state = self.write();
        if state.nodes.contains_key(&root.path) {
            return false;
        }

        let overlaps = state
            .roots
            .iter()
            .any(|r| path::is_sub_path(&root.path, r) || path::is_sub_path(r, &root.path));
        if overlaps {
            debug!("{} overlaps an open tree, indexing only", root.path);
        } else {
            state.roots.push(root.path.clone());
        }

        state.insert(&root);
        state.link(&root.path);
        true
    }

    /// Replace the subtree at `entry.path` with `entry`.
    pub fn refresh(&self, entry: FileEntry) {
        let mut state = self.write();
        state.remove_subtree(&entry.path);
        state.insert(&entry);
        state.link(&entry.path);
    }

    /// Drop `path` and its subtree, detaching it from its parent.
    pub fn remove(&self, path: &str) -> Option<FileEntry> {
        let mut state = self.write();
        state.roots.retain(|r| r != path);
        state.unlink(path);
        state.remove_subtree(path)
    }

    /// Unregister the root at `path` and drop its subtree.
    pub fn remove_root(&self, path: &str) -> Option<FileEntry> {
        let mut state = self.write();
        state.roots.retain(|r| r != path);
        state.remove_subtree(path)
    }

    pub fn is_root(&self, path: &str) -> bool {
        self.read().is_root(path)
    }

    /// Every registered root with its subtree, in opening order.
    pub fn roots(&self) -> Vec<FileEntry> {
        let state = self.read();
        state.roots.iter().filter_map(|r| state.build(r)).collect()
    }

    /// Flip the expanded flag of `path`. Returns the new state.
    pub fn toggle_expand(&self, path: &str) -> bool {
        let mut state = self.write();
        if let Some(index) = state.expanded.iter().position(|p| p == path) {
            state.expanded.remove(index);
            false
        } else {
            state.expanded.push(path.to_string());
            true
        }
    }

    pub fn is_expanded(&self, path: &str) -> bool {
        self.read().expanded.iter().any(|p| p == path)
    }

    pub fn expanded_paths(&self) -> Vec<String> {
        self.read().expanded.clone()
    }

    /// Every indexed path under `path`, including `path` itself.
    pub fn subtree_paths(&self, path: &str) -> Vec<String> {
        let state = self.read();
        let mut seen = HashSet::new();
        let mut stack = vec![path.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = state.nodes.get(&current) {
                if seen.insert(current.clone()) {
                    stack.extend(node.children.iter().cloned());
                }
            }
        }
        let mut paths: Vec<String> = seen.into_iter().collect();
        paths.sort();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdvault_core::StorageLocation;

    fn file(path: &str) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            name: path::filename(path),
            storage_location: StorageLocation::Local,
            is_dir: false,
            size: 1,
            last_modified: 0,
            version: Some("1-1".into()),
            readonly: false,
            is_root: false,
            children: None,
        }
    }

    fn dir(path: &str, children: Vec<FileEntry>) -> FileEntry {
        FileEntry {
            is_dir: true,
            size: 0,
            version: None,
            children: Some(children),
            ..file(path)
        }
    }

    #[test]
    fn test_load_decorates_root() {
        let cache = FileTreeCache::new();
        assert!(cache.load_file_tree(dir("/notes", vec![file("/notes/a.md")])));
        let root = cache.get("/notes").unwrap();
        assert!(root.is_root);
        assert_eq!(root.name, "notes(/notes)");
        assert_eq!(root.children().len(), 1);
        assert!(!cache.get("/notes/a.md").unwrap().is_root);
    }

    #[test]
    fn test_load_known_path_is_rejected() {
        let cache = FileTreeCache::new();
        assert!(cache.load_file_tree(dir("/notes", vec![file("/notes/a.md")])));
        assert!(!cache.load_file_tree(dir("/notes", vec![])));
        assert!(!cache.load_file_tree(file("/notes/a.md")));
        assert_eq!(cache.roots().len(), 1);
        assert_eq!(cache.get("/notes").unwrap().children().len(), 1);
    }

    #[test]
    fn test_parent_of_open_root_is_indexed_but_not_registered() {
        let cache = FileTreeCache::new();
        cache.load_file_tree(dir("/root/a/b", vec![]));
        cache.load_file_tree(dir("/root/a", vec![file("/root/a/c.md")]));
        let roots: Vec<String> = cache.roots().into_iter().map(|r| r.path).collect();
        assert_eq!(roots, vec!["/root/a/b"]);
        assert!(cache.contains("/root/a/c.md"));
    }

    #[test]
    fn test_parent_load_keeps_nested_root_decorated_and_fresh() {
        let cache = FileTreeCache::new();
        cache.load_file_tree(dir("/root/a/b", vec![file("/root/a/b/old.md")]));
        cache.load_file_tree(dir(
            "/root/a",
            vec![dir("/root/a/b", vec![file("/root/a/b/new.md")])],
        ));

        let nested = cache.get("/root/a/b").unwrap();
        assert!(nested.is_root);
        assert_eq!(nested.name, "b(/root/a/b)");
        assert!(!cache.contains("/root/a/b/old.md"));
        assert!(cache.contains("/root/a/b/new.md"));
        let roots: Vec<String> = cache.roots().into_iter().map(|r| r.path).collect();
        assert_eq!(roots, vec!["/root/a/b"]);
    }

    #[test]
    fn test_refresh_drops_stale_descendants() {
        let cache = FileTreeCache::new();
        cache.load_file_tree(dir(
            "/notes",
            vec![dir("/notes/old", vec![file("/notes/old/x.md")]), file("/notes/a.md")],
        ));
        cache.refresh(dir("/notes", vec![file("/notes/a.md"), file("/notes/b.md")]));

        assert!(!cache.contains("/notes/old"));
        assert!(!cache.contains("/notes/old/x.md"));
        let root = cache.get("/notes").unwrap();
        assert!(root.is_root);
        assert_eq!(root.name, "notes(/notes)");
        assert_eq!(root.children().len(), 2);
    }

    #[test]
    fn test_set_links_new_child_into_parent() {
        let cache = FileTreeCache::new();
        cache.load_file_tree(dir("/notes", vec![file("/notes/b.md")]));
        cache.set(&[file("/notes/a.md"), dir("/notes/sub", vec![])]);
        let names: Vec<String> = cache
            .get("/notes")
            .unwrap()
            .children()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["sub", "a.md", "b.md"]);
    }

    #[test]
    fn test_remove_root_returns_subtree() {
        let cache = FileTreeCache::new();
        cache.load_file_tree(dir("/notes", vec![dir("/notes/d", vec![file("/notes/d/x.md")])]));
        cache.load_file_tree(file("/other.md"));

        let removed = cache.remove_root("/notes").unwrap();
        assert_eq!(removed.path, "/notes");
        assert_eq!(removed.children()[0].children()[0].path, "/notes/d/x.md");
        assert!(!cache.contains("/notes/d/x.md"));
        assert_eq!(cache.roots().len(), 1);
        assert!(cache.remove_root("/notes").is_none());
    }

    #[test]
    fn test_remove_unlinks_from_parent() {
        let cache = FileTreeCache::new();
        cache.load_file_tree(dir("/notes", vec![file("/notes/a.md"), file("/notes/b.md")]));
        assert!(cache.remove("/notes/a.md").is_some());
        assert_eq!(cache.get("/notes").unwrap().children().len(), 1);
        assert_eq!(cache.subtree_paths("/notes"), vec!["/notes", "/notes/b.md"]);
    }

    #[test]
    fn test_toggle_expand() {
        let cache = FileTreeCache::new();
        assert!(cache.toggle_expand("/notes"));
        assert!(cache.is_expanded("/notes"));
        assert!(!cache.toggle_expand("/notes"));
        assert!(cache.expanded_paths().is_empty());
    }
}
