//! File-tree operations that keep the backend, the tree cache and the open
//! documents in step.

use std::sync::Arc;

use mdvault_core::{path, FileEntry, FileRef, StorageError};
use tracing::{debug, info, instrument, warn};

use crate::file_service::UnifiedFileService;
use crate::recent::RecentStore;
use crate::save::SaveCoordinator;
use crate::tree::FileTreeCache;

pub struct Workspace {
    files: UnifiedFileService,
    tree: Arc<FileTreeCache>,
    sessions: Arc<SaveCoordinator>,
    recent: Arc<RecentStore>,
}

impl Workspace {
    pub fn new(
        files: UnifiedFileService,
        tree: Arc<FileTreeCache>,
        sessions: Arc<SaveCoordinator>,
        recent: Arc<RecentStore>,
    ) -> Self {
        Self {
            files,
            tree,
            sessions,
            recent,
        }
    }

    pub fn tree(&self) -> &Arc<FileTreeCache> {
        &self.tree
    }

    pub fn recent(&self) -> &Arc<RecentStore> {
        &self.recent
    }

    /// Open a file or directory as a tree root. Returns `false` when it is
    /// already indexed.
    #[instrument(skip(self), level = "debug", fields(path = %file.path))]
    pub async fn open(&self, file: &FileRef) -> Result<bool, StorageError> {
        if self.tree.contains(&file.path) {
            return Ok(false);
        }
        let stat = self.files.stat(file).await?;
        let opened = stat.file_ref();
        let entry = if stat.is_dir {
            self.files.read_directory(&opened, true).await?
        } else {
            stat
        };
        let loaded = self.tree.load_file_tree(entry);
        if loaded {
            info!("Opened {}", file.path);
            if let Err(e) = self.recent.add(&opened).await {
                warn!("Failed to record {} as recent: {}", opened.path, e);
            }
        }
        Ok(loaded)
    }

    /// Re-read `file` (or its parent) from the backend into the tree.
    ///
    /// A parent that is not indexed falls back to the entry itself, and an
    /// entry outside every open tree is left alone. An entry that no longer
    /// exists is dropped from the tree.
    pub async fn refresh(&self, file: &FileRef, use_parent: bool) -> Result<(), StorageError> {
        let parent = path::dirname(&file.path);
        let target = if use_parent && parent != file.path && self.tree.contains(&parent) {
            file.with_path(parent).dir()
        } else {
            file.clone()
        };
        if !self.tree.contains(&target.path) {
            debug!("{} is not in an open tree, nothing to refresh", target.path);
            return Ok(());
        }

        let result = if target.is_dir {
            self.files.read_directory(&target, true).await
        } else {
            self.files.stat(&target).await
        };
        match result {
            Ok(entry) => {
                debug!("Refreshed {}", entry.path);
                self.tree.refresh(entry);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("{} is gone, dropping it from the tree", target.path);
                self.tree.remove(&target.path);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Rename `entry` within its directory.
    ///
    /// Fails with `AlreadyExists` before touching anything if the new name
    /// is taken.
    #[instrument(skip(self, entry), level = "debug", fields(path = %entry.path))]
    pub async fn rename(&self, entry: &FileEntry, new_name: &str) -> Result<String, StorageError> {
        if new_name.is_empty() || !path::is_valid_file_path(new_name) || new_name.contains('/') {
            return Err(StorageError::InvalidPath(new_name.to_string()));
        }
        let new_path = path::join(&[&path::dirname(&entry.path), new_name]);
        let target = entry.file_ref().with_path(new_path.clone());
        if self.files.exists(&target).await {
            return Err(StorageError::AlreadyExists(new_path));
        }

        self.files.rename(&entry.file_ref(), &new_path).await?;
        self.relocate(&entry.file_ref(), &target).await?;
        self.sessions.update_path(&entry.path, Some(&new_path));
        info!("Renamed {} to {}", entry.path, new_path);
        Ok(new_path)
    }

    /// Delete `entry` from its backend and from the tree.
    pub async fn remove(&self, entry: &FileEntry) -> Result<(), StorageError> {
        self.files.delete(&entry.file_ref()).await?;
        if self.tree.is_root(&entry.path) {
            self.tree.remove_root(&entry.path);
        } else {
            self.refresh(&entry.file_ref(), true).await?;
        }
        self.sessions.update_path(&entry.path, None);
        info!("Deleted {}", entry.path);
        Ok(())
    }

    /// Create an empty file or directory and show it in its parent.
    pub async fn create(&self, file: &FileRef) -> Result<(), StorageError> {
        if self.files.exists(file).await {
            return Err(StorageError::AlreadyExists(file.path.clone()));
        }
        self.files.create(file).await?;
        self.refresh(file, true).await
    }

    /// Move `source` to `target`, possibly across storage locations.
    pub async fn move_entry(&self, source: &FileRef, target: &FileRef) -> Result<(), StorageError> {
        self.files.move_across_storage(source, target).await?;
        let target = FileRef {
            is_dir: source.is_dir,
            ..target.clone()
        };
        self.relocate(source, &target).await?;
        self.sessions.update_path(&source.path, Some(&target.path));
        Ok(())
    }

    /// Close the tree rooted at `path`. Documents under it are closed too.
    pub fn remove_from_tree(&self, path: &str) -> Option<FileEntry> {
        let removed = self.tree.remove_root(path)?;
        self.sessions.update_path(path, None);
        Some(removed)
    }

    pub fn toggle_expand(&self, path: &str) -> bool {
        self.tree.toggle_expand(path)
    }

    pub fn expanded_paths(&self) -> Vec<String> {
        self.tree.expanded_paths()
    }

    /// Update the tree after `from` became `to` on the backend.
    async fn relocate(&self, from: &FileRef, to: &FileRef) -> Result<(), StorageError> {
        if self.tree.is_root(&from.path) {
            self.tree.remove_root(&from.path);
            let entry = if to.is_dir {
                self.files.read_directory(to, true).await?
            } else {
                self.files.stat(to).await?
            };
            self.tree.load_file_tree(entry);
            return Ok(());
        }
        self.refresh(from, true).await?;
        self.refresh(to, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::VersionHistoryStore;
    use crate::save::StaticDialog;
    use crate::settings::StaticSettings;
    use mdvault_core::{MemoryBackend, StorageBackend, StorageLocation};

    struct Fixture {
        local: Arc<MemoryBackend>,
        remote: Arc<MemoryBackend>,
        sessions: Arc<SaveCoordinator>,
        workspace: Workspace,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(MemoryBackend::new(StorageLocation::Local));
        let remote = Arc::new(MemoryBackend::new(StorageLocation::Remote));
        let files = UnifiedFileService::new(local.clone(), remote.clone());
        let tree = Arc::new(FileTreeCache::new());
        let sessions = Arc::new(SaveCoordinator::new(
            files.clone(),
            Arc::new(VersionHistoryStore::new(local.clone(), "/history")),
            tree.clone(),
            Arc::new(StaticSettings::default()),
            Arc::new(StaticDialog { overwrite: true }),
        ));
        let recent = Arc::new(RecentStore::new(local.clone(), "/state/recent.json"));
        let workspace = Workspace::new(files, tree, sessions.clone(), recent);
        Fixture {
            local,
            remote,
            sessions,
            workspace,
        }
    }

    fn child_names(f: &Fixture, path: &str) -> Vec<String> {
        f.workspace
            .tree()
            .get(path)
            .unwrap()
            .children()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_open_indexes_recursively_once() {
        let f = fixture();
        f.local.seed("/notes/a.md", "a");
        f.local.seed("/notes/sub/b.md", "b");
        assert!(f.workspace.open(&FileRef::local("/notes").dir()).await.unwrap());
        assert!(f.workspace.tree().contains("/notes/sub/b.md"));
        assert!(!f.workspace.open(&FileRef::local("/notes").dir()).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_records_recent_entries() {
        let f = fixture();
        f.local.seed("/notes/a.md", "a");
        f.local.seed("/solo.md", "x");
        f.workspace.open(&FileRef::local("/notes").dir()).await.unwrap();
        f.workspace.open(&FileRef::local("/solo.md")).await.unwrap();
        f.workspace.open(&FileRef::local("/notes").dir()).await.unwrap();

        let recent = f.workspace.recent().sorted().await.unwrap();
        let paths: Vec<&str> = recent.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/solo.md", "/notes"]);
        assert!(recent[1].is_dir);
        assert!(f.local.exists("/state/recent.json", Some(false)).await);
    }

    #[tokio::test]
    async fn test_create_then_rename_collision() {
        let f = fixture();
        f.local.seed("/notes/a.md", "a");
        f.workspace.open(&FileRef::local("/notes").dir()).await.unwrap();

        f.workspace.create(&FileRef::local("/notes/b.md")).await.unwrap();
        f.workspace
            .create(&FileRef::local("/notes/drafts").dir())
            .await
            .unwrap();
        assert_eq!(child_names(&f, "/notes"), vec!["drafts", "a.md", "b.md"]);

        let a = f.workspace.tree().get("/notes/a.md").unwrap();
        let err = f.workspace.rename(&a, "b.md").await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(f.local.read_text("/notes/a.md").await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_rename_updates_tree_and_sessions() {
        let f = fixture();
        f.local.seed("/notes/a.md", "a");
        f.workspace.open(&FileRef::local("/notes").dir()).await.unwrap();
        f.sessions
            .open_document(FileRef::local("/notes/a.md"))
            .await
            .unwrap();

        let a = f.workspace.tree().get("/notes/a.md").unwrap();
        let new_path = f.workspace.rename(&a, "c.md").await.unwrap();
        assert_eq!(new_path, "/notes/c.md");
        assert!(!f.workspace.tree().contains("/notes/a.md"));
        assert!(f.workspace.tree().contains("/notes/c.md"));
        assert_eq!(f.sessions.open_paths(), vec!["/notes/c.md"]);
    }

    #[tokio::test]
    async fn test_rename_root_keeps_it_open() {
        let f = fixture();
        f.local.seed("/notes/a.md", "a");
        f.workspace.open(&FileRef::local("/notes").dir()).await.unwrap();
        let root = f.workspace.tree().get("/notes").unwrap();

        f.workspace.rename(&root, "journal").await.unwrap();
        let roots = f.workspace.tree().roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path, "/journal");
        assert_eq!(roots[0].name, "journal(/journal)");
        assert!(f.workspace.tree().contains("/journal/a.md"));
        assert!(!f.workspace.tree().contains("/notes"));
    }

    #[tokio::test]
    async fn test_remove_child_and_root() {
        let f = fixture();
        f.local.seed("/notes/a.md", "a");
        f.local.seed("/notes/b.md", "b");
        f.workspace.open(&FileRef::local("/notes").dir()).await.unwrap();
        f.sessions
            .open_document(FileRef::local("/notes/a.md"))
            .await
            .unwrap();

        let a = f.workspace.tree().get("/notes/a.md").unwrap();
        f.workspace.remove(&a).await.unwrap();
        assert_eq!(child_names(&f, "/notes"), vec!["b.md"]);
        assert!(f.sessions.open_paths().is_empty());

        let root = f.workspace.tree().get("/notes").unwrap();
        f.workspace.remove(&root).await.unwrap();
        assert!(f.workspace.tree().roots().is_empty());
        assert!(!f.local.exists("/notes", None).await);
    }

    #[tokio::test]
    async fn test_move_across_storage_refreshes_both_sides() {
        let f = fixture();
        f.local.seed("/notes/a.md", "a");
        f.remote.seed_dir("/dav");
        f.workspace.open(&FileRef::local("/notes").dir()).await.unwrap();
        f.workspace.open(&FileRef::remote("/dav").dir()).await.unwrap();

        f.workspace
            .move_entry(&FileRef::local("/notes/a.md"), &FileRef::remote("/dav/a.md"))
            .await
            .unwrap();
        assert!(child_names(&f, "/notes").is_empty());
        assert_eq!(child_names(&f, "/dav"), vec!["a.md"]);
        assert_eq!(f.remote.read_text("/dav/a.md").await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_refresh_drops_deleted_file() {
        let f = fixture();
        f.local.seed("/solo.md", "x");
        f.workspace.open(&FileRef::local("/solo.md")).await.unwrap();
        f.local.delete("/solo.md", false).await.unwrap();
        f.workspace
            .refresh(&FileRef::local("/solo.md"), false)
            .await
            .unwrap();
        assert!(!f.workspace.tree().contains("/solo.md"));
    }

    #[tokio::test]
    async fn test_remove_from_tree_closes_documents() {
        let f = fixture();
        f.local.seed("/notes/a.md", "a");
        f.workspace.open(&FileRef::local("/notes").dir()).await.unwrap();
        f.sessions
            .open_document(FileRef::local("/notes/a.md"))
            .await
            .unwrap();
        assert!(f.workspace.remove_from_tree("/notes").is_some());
        assert!(f.sessions.open_paths().is_empty());
        assert!(f.workspace.remove_from_tree("/notes").is_none());
        assert!(f.local.exists("/notes/a.md", None).await);
    }

    #[tokio::test]
    async fn test_changes_outside_open_trees_do_not_block_opening() {
        let f = fixture();
        f.local.seed_dir("/inbox");
        f.local.seed("/notes/a.md", "a");
        f.workspace.open(&FileRef::local("/notes").dir()).await.unwrap();

        f.workspace.create(&FileRef::local("/inbox/new.md")).await.unwrap();
        f.workspace
            .move_entry(&FileRef::local("/notes/a.md"), &FileRef::local("/inbox/a.md"))
            .await
            .unwrap();
        assert!(!f.workspace.tree().contains("/inbox/new.md"));
        assert!(!f.workspace.tree().contains("/inbox/a.md"));

        assert!(f.workspace.open(&FileRef::local("/inbox").dir()).await.unwrap());
        assert_eq!(child_names(&f, "/inbox"), vec!["a.md", "new.md"]);
        assert!(f.workspace.tree().is_root("/inbox"));
    }
}
