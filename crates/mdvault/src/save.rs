//! Document sessions and the save path.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use mdvault_core::{path, DialogFilter, DialogOptions, FileRef, StorageError};
use tracing::{debug, error, info, instrument, warn};

use crate::debounce::KeyedDebouncer;
use crate::file_service::UnifiedFileService;
use crate::history::{NewVersion, VersionHistoryStore};
use crate::locks::PathLocks;
use crate::settings::SettingsSource;
use crate::tree::FileTreeCache;

/// User prompts raised while saving.
#[async_trait]
pub trait Dialog: Send + Sync {
    /// Ask a yes/no question. `true` means go ahead.
    async fn confirm(&self, title: &str, message: &str) -> bool;

    /// Report a failure the user must know about.
    fn notify_error(&self, title: &str, error: &StorageError);
}

/// Non-interactive dialog answering every prompt the same way.
#[derive(Debug, Clone, Copy)]
pub struct StaticDialog {
    pub overwrite: bool,
}

#[async_trait]
impl Dialog for StaticDialog {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        warn!("{}: {} -> {}", title, message, if self.overwrite { "yes" } else { "no" });
        self.overwrite
    }

    fn notify_error(&self, title: &str, error: &StorageError) {
        error!("{}: {}", title, error);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Clean,
    Dirty,
    Saving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing to save: the document is clean or not open.
    Skipped,
    /// Written. `clean` is false when an edit landed while saving.
    Saved { clean: bool },
    /// The file changed on disk and the user chose not to overwrite it.
    Declined,
}

#[derive(Debug, Clone)]
struct Session {
    file: FileRef,
    edit_version: u64,
    unsaved: bool,
    saving: bool,
    /// Backend version the in-memory content was loaded from or last saved as
    known_version: Option<String>,
}

impl Session {
    fn new(file: FileRef, known_version: Option<String>) -> Self {
        Self {
            file,
            edit_version: 0,
            unsaved: false,
            saving: false,
            known_version,
        }
    }

    fn state(&self) -> DocumentState {
        match (self.saving, self.unsaved) {
            (true, _) => DocumentState::Saving,
            (false, true) => DocumentState::Dirty,
            (false, false) => DocumentState::Clean,
        }
    }
}

fn save_key(path: &str) -> String {
    format!("save:{}", path)
}

fn history_key(path: &str) -> String {
    format!("history:{}", path)
}

/// Serializes saves per path, detects external changes and feeds the
/// history store.
pub struct SaveCoordinator {
    files: UnifiedFileService,
    history: Arc<VersionHistoryStore>,
    tree: Arc<FileTreeCache>,
    settings: Arc<dyn SettingsSource>,
    dialog: Arc<dyn Dialog>,
    locks: PathLocks,
    debouncer: KeyedDebouncer,
    sessions: DashMap<String, Session>,
}

impl SaveCoordinator {
    pub fn new(
        files: UnifiedFileService,
        history: Arc<VersionHistoryStore>,
        tree: Arc<FileTreeCache>,
        settings: Arc<dyn SettingsSource>,
        dialog: Arc<dyn Dialog>,
    ) -> Self {
        Self {
            files,
            history,
            tree,
            settings,
            dialog,
            locks: PathLocks::new(),
            debouncer: KeyedDebouncer::new(),
            sessions: DashMap::new(),
        }
    }

    pub fn locks(&self) -> &PathLocks {
        &self.locks
    }

    /// Load a document and start tracking it as clean.
    pub async fn open_document(&self, file: FileRef) -> Result<String, StorageError> {
        let content = self.files.read_text(&file).await?;
        let known_version = match self.files.stat(&file).await {
            Ok(entry) => entry.version,
            Err(e) => {
                warn!("Failed to stat {} on open: {}", file.path, e);
                None
            }
        };
        debug!("Opened {} at version {:?}", file.path, known_version);
        self.sessions
            .insert(file.path.clone(), Session::new(file, known_version));
        Ok(content)
    }

    /// Record an edit. Returns the new edit version.
    pub fn mark_edited(&self, path: &str) -> Option<u64> {
        let mut session = self.sessions.get_mut(path)?;
        session.edit_version += 1;
        session.unsaved = true;
        Some(session.edit_version)
    }

    pub fn state(&self, path: &str) -> Option<DocumentState> {
        self.sessions.get(path).map(|s| s.state())
    }

    pub fn known_version(&self, path: &str) -> Option<String> {
        self.sessions.get(path).and_then(|s| s.known_version.clone())
    }

    pub fn open_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Stop tracking `path` and drop its pending timers.
    pub fn close_document(&self, path: &str) -> bool {
        self.debouncer.cancel(&save_key(path));
        self.debouncer.cancel(&history_key(path));
        self.sessions.remove(path).is_some()
    }

    /// Follow a rename of `old` to `new`, or close everything at and below
    /// `old` when `new` is `None`.
    pub fn update_path(&self, old: &str, new: Option<&str>) {
        let affected: Vec<(String, String)> = self
            .sessions
            .iter()
            .filter_map(|s| {
                path::relative_http_path(old, s.key()).map(|rest| (s.key().clone(), rest))
            })
            .collect();

        for (current, rest) in affected {
            match new {
                None => {
                    self.close_document(&current);
                    debug!("Closed {} after delete", current);
                }
                Some(new) => {
                    self.debouncer.cancel(&save_key(&current));
                    self.debouncer.cancel(&history_key(&current));
                    let Some((_, mut session)) = self.sessions.remove(&current) else {
                        continue;
                    };
                    let target = if rest.is_empty() {
                        new.to_string()
                    } else {
                        path::join(&[new, &rest])
                    };
                    session.file = session.file.with_path(target.clone());
                    debug!("Session {} now {}", current, target);
                    self.sessions.insert(target, session);
                }
            }
        }
    }

    /// Save `content` to the document at `path`.
    ///
    /// Saves to one path run one at a time in arrival order. When the file
    /// changed on the backend since it was loaded the dialog decides whether
    /// to overwrite. The document only becomes clean if no edit happened
    /// after this call started.
    #[instrument(skip(self, content), level = "debug", fields(data_len = content.len()))]
    pub async fn save(&self, path: &str, content: &str) -> Result<SaveOutcome, StorageError> {
        let started_at = match self.sessions.get(path) {
            Some(s) if s.unsaved => s.edit_version,
            _ => return Ok(SaveOutcome::Skipped),
        };

        let _guard = self.locks.lock(path).await;

        // An earlier save of the same content may have cleaned it meanwhile.
        let (file, known_version) = match self.sessions.get_mut(path) {
            Some(mut s) if s.unsaved => {
                s.saving = true;
                (s.file.clone(), s.known_version.clone())
            }
            _ => return Ok(SaveOutcome::Skipped),
        };

        self.schedule_snapshot(path, content);

        if let Some(known) = known_version {
            match self.files.stat(&file).await {
                Ok(current) if current.version.as_deref() != Some(known.as_str()) => {
                    let message = format!(
                        "{} was changed outside the editor. Overwrite it?",
                        path::filename(path)
                    );
                    if !self.dialog.confirm("File changed", &message).await {
                        info!("Save of {} declined after external change", path);
                        self.finish(path, None);
                        return Ok(SaveOutcome::Declined);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to stat {} before save, writing anyway: {}", path, e),
            }
        }

        if let Err(e) = self.files.write_text(&file, content).await {
            error!("Failed to save {}: {}", path, e);
            self.finish(path, None);
            self.dialog.notify_error("Save failed", &e);
            return Err(e);
        }

        let new_version = match self.files.stat(&file).await {
            Ok(entry) => {
                let version = entry.version.clone();
                if self.tree.contains(&entry.path) {
                    self.tree.refresh(entry);
                }
                version
            }
            Err(e) => {
                warn!("Failed to stat {} after save: {}", path, e);
                None
            }
        };

        let clean = self.finish(path, Some((started_at, new_version)));
        debug!("Saved {} (clean: {})", path, clean);
        Ok(SaveOutcome::Saved { clean })
    }

    /// Leave the saving state. After a successful write, record the new
    /// backend version and clean the document unless it was edited since
    /// `started_at`.
    fn finish(&self, path: &str, written: Option<(u64, Option<String>)>) -> bool {
        let Some(mut session) = self.sessions.get_mut(path) else {
            return false;
        };
        session.saving = false;
        let Some((started_at, version)) = written else {
            return false;
        };
        session.known_version = version;
        if session.edit_version == started_at {
            session.unsaved = false;
        }
        !session.unsaved
    }

    fn schedule_snapshot(&self, path: &str, content: &str) {
        let settings = self.settings.current();
        if !settings.history.auto_save {
            return;
        }
        let history = Arc::clone(&self.history);
        let owned_path = path.to_string();
        let content = content.to_string();
        let max_num = settings.history.max_num;
        self.debouncer
            .schedule(&history_key(path), settings.history_delay(), async move {
                let new = NewVersion {
                    path: &owned_path,
                    content: &content,
                    message: None,
                    max_num,
                };
                if let Err(e) = history.create_version(new).await {
                    warn!("Failed to record history for {}: {}", owned_path, e);
                }
            });
    }

    /// Save `content` after the configured idle delay, unless another edit
    /// reschedules it first.
    pub fn schedule_auto_save(self: &Arc<Self>, path: &str, content: String) {
        let settings = self.settings.current();
        if !settings.save.auto_save {
            return;
        }
        let this: Weak<Self> = Arc::downgrade(self);
        let owned_path = path.to_string();
        self.debouncer
            .schedule(&save_key(path), settings.auto_save_delay(), async move {
                let Some(this) = this.upgrade() else {
                    return;
                };
                if let Err(e) = this.save(&owned_path, &content).await {
                    warn!("Auto-save of {} failed: {}", owned_path, e);
                }
            });
    }

    pub fn is_auto_save_pending(&self, path: &str) -> bool {
        self.debouncer.is_pending(&save_key(path))
    }

    pub fn is_snapshot_pending(&self, path: &str) -> bool {
        self.debouncer.is_pending(&history_key(path))
    }

    /// Ask for a local destination, move the session there and save.
    ///
    /// Returns the new file, or `None` when the picker was cancelled.
    pub async fn save_as(
        &self,
        path: &str,
        content: &str,
    ) -> Result<Option<FileRef>, StorageError> {
        let options = DialogOptions {
            title: Some("Save as".to_string()),
            filters: vec![DialogFilter {
                name: "Markdown".to_string(),
                extensions: vec!["md".to_string(), "MD".to_string()],
            }],
            default_path: Some(path::filename(path)),
            directory: false,
        };
        let Some(target) = self.files.save_file_dialog(options).await? else {
            return Ok(None);
        };

        let file = FileRef::local(target.clone());
        // Wait out an in-flight save of the old path before re-keying.
        let old_guard = self.locks.lock(path).await;
        self.debouncer.cancel(&save_key(path));
        self.debouncer.cancel(&history_key(path));
        let mut session = self
            .sessions
            .remove(path)
            .map(|(_, s)| s)
            .unwrap_or_else(|| Session::new(file.clone(), None));
        session.file = file.clone();
        session.known_version = None;
        session.unsaved = true;
        self.sessions.insert(target.clone(), session);
        drop(old_guard);
        info!("Saving {} as {}", path, target);

        self.save(&target, content).await?;
        Ok(Some(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Settings, StaticSettings};
    use mdvault_core::{MemoryBackend, StorageBackend, StorageLocation};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingDialog {
        answer: bool,
        confirms: AtomicUsize,
        errors: AtomicUsize,
    }

    #[async_trait]
    impl Dialog for CountingDialog {
        async fn confirm(&self, _title: &str, _message: &str) -> bool {
            self.confirms.fetch_add(1, Ordering::SeqCst);
            self.answer
        }

        fn notify_error(&self, _title: &str, _error: &StorageError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        local: Arc<MemoryBackend>,
        dialog: Arc<CountingDialog>,
        coordinator: Arc<SaveCoordinator>,
    }

    fn fixture(answer: bool, settings: Settings) -> Fixture {
        let local = Arc::new(MemoryBackend::new(StorageLocation::Local));
        let remote = Arc::new(MemoryBackend::new(StorageLocation::Remote));
        let files = UnifiedFileService::new(local.clone(), remote);
        let history = Arc::new(VersionHistoryStore::new(local.clone(), "/history"));
        let dialog = Arc::new(CountingDialog {
            answer,
            ..Default::default()
        });
        let coordinator = Arc::new(SaveCoordinator::new(
            files,
            history,
            Arc::new(FileTreeCache::new()),
            Arc::new(StaticSettings::new(settings)),
            dialog.clone(),
        ));
        Fixture {
            local,
            dialog,
            coordinator,
        }
    }

    fn no_history() -> Settings {
        let mut settings = Settings::default();
        settings.history.auto_save = false;
        settings
    }

    #[tokio::test]
    async fn test_clean_document_is_skipped() {
        let f = fixture(true, no_history());
        f.local.seed("/doc.md", "v1");
        f.coordinator
            .open_document(FileRef::local("/doc.md"))
            .await
            .unwrap();
        let outcome = f.coordinator.save("/doc.md", "v1").await.unwrap();
        assert_eq!(outcome, SaveOutcome::Skipped);
        assert_eq!(
            f.coordinator.save("/unknown.md", "x").await.unwrap(),
            SaveOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_save_cleans_and_tracks_new_version() {
        let f = fixture(true, no_history());
        f.local.seed("/doc.md", "v1");
        f.coordinator
            .open_document(FileRef::local("/doc.md"))
            .await
            .unwrap();
        let before = f.coordinator.known_version("/doc.md");
        f.coordinator.mark_edited("/doc.md");
        assert_eq!(f.coordinator.state("/doc.md"), Some(DocumentState::Dirty));

        let outcome = f.coordinator.save("/doc.md", "v2").await.unwrap();
        assert_eq!(outcome, SaveOutcome::Saved { clean: true });
        assert_eq!(f.coordinator.state("/doc.md"), Some(DocumentState::Clean));
        assert_ne!(f.coordinator.known_version("/doc.md"), before);
        assert_eq!(f.local.read_text("/doc.md").await.unwrap(), "v2");
        assert_eq!(f.dialog.confirms.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_external_change_declined_keeps_file() {
        let f = fixture(false, no_history());
        f.local.seed("/doc.md", "v1");
        f.coordinator
            .open_document(FileRef::local("/doc.md"))
            .await
            .unwrap();
        f.local.write_text("/doc.md", "external").await.unwrap();
        f.coordinator.mark_edited("/doc.md");

        let outcome = f.coordinator.save("/doc.md", "mine").await.unwrap();
        assert_eq!(outcome, SaveOutcome::Declined);
        assert_eq!(f.dialog.confirms.load(Ordering::SeqCst), 1);
        assert_eq!(f.local.read_text("/doc.md").await.unwrap(), "external");
        assert_eq!(f.coordinator.state("/doc.md"), Some(DocumentState::Dirty));
    }

    #[tokio::test]
    async fn test_stat_failure_still_writes() {
        let f = fixture(false, no_history());
        f.local.seed("/doc.md", "v1");
        f.coordinator
            .open_document(FileRef::local("/doc.md"))
            .await
            .unwrap();
        f.coordinator.mark_edited("/doc.md");
        f.local.set_fail_stats(true);

        let outcome = f.coordinator.save("/doc.md", "v2").await.unwrap();
        assert_eq!(outcome, SaveOutcome::Saved { clean: true });
        assert_eq!(f.dialog.confirms.load(Ordering::SeqCst), 0);
        assert_eq!(f.coordinator.known_version("/doc.md"), None);
        assert_eq!(f.local.read_text("/doc.md").await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_write_failure_leaves_dirty() {
        let f = fixture(true, no_history());
        f.local.seed("/doc.md", "v1");
        f.coordinator
            .open_document(FileRef::local("/doc.md"))
            .await
            .unwrap();
        f.coordinator.mark_edited("/doc.md");
        f.local.set_fail_writes(true);

        let err = f.coordinator.save("/doc.md", "v2").await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert_eq!(f.dialog.errors.load(Ordering::SeqCst), 1);
        assert_eq!(f.coordinator.state("/doc.md"), Some(DocumentState::Dirty));
    }

    #[tokio::test]
    async fn test_edit_during_save_stays_dirty() {
        let f = fixture(true, no_history());
        f.local.seed("/doc.md", "v1");
        f.coordinator
            .open_document(FileRef::local("/doc.md"))
            .await
            .unwrap();
        f.coordinator.mark_edited("/doc.md");
        f.local.set_write_delay(Some(Duration::from_millis(50)));

        let coordinator = Arc::clone(&f.coordinator);
        let save = tokio::spawn(async move { coordinator.save("/doc.md", "v2").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.coordinator.state("/doc.md"), Some(DocumentState::Saving));
        f.coordinator.mark_edited("/doc.md");

        let outcome = save.await.unwrap().unwrap();
        assert_eq!(outcome, SaveOutcome::Saved { clean: false });
        assert_eq!(f.coordinator.state("/doc.md"), Some(DocumentState::Dirty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_are_debounced() {
        let f = fixture(true, Settings::default());
        f.local.seed("/doc.md", "v0");
        f.coordinator
            .open_document(FileRef::local("/doc.md"))
            .await
            .unwrap();
        for content in ["v1", "v2", "v3"] {
            f.coordinator.mark_edited("/doc.md");
            f.coordinator.save("/doc.md", content).await.unwrap();
        }
        assert!(f.coordinator.is_snapshot_pending("/doc.md"));

        tokio::time::sleep(Duration::from_secs(61)).await;
        // Let the spawned snapshot task finish its writes.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let versions = f.coordinator.history.list_versions("/doc.md").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(
            f.coordinator
                .history
                .get_version("/doc.md", &versions[0].id)
                .await
                .as_deref(),
            Some("v3")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_work() {
        let f = fixture(true, Settings::default());
        f.local.seed("/doc.md", "v0");
        f.coordinator
            .open_document(FileRef::local("/doc.md"))
            .await
            .unwrap();
        f.coordinator.mark_edited("/doc.md");
        f.coordinator
            .schedule_auto_save("/doc.md", "pending".to_string());
        assert!(f.coordinator.is_auto_save_pending("/doc.md"));

        assert!(f.coordinator.close_document("/doc.md"));
        assert!(!f.coordinator.is_auto_save_pending("/doc.md"));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.local.read_text("/doc.md").await.unwrap(), "v0");
    }

    #[tokio::test]
    async fn test_update_path_moves_and_closes_sessions() {
        let f = fixture(true, no_history());
        f.local.seed("/notes/a.md", "a");
        f.local.seed("/notes/sub/b.md", "b");
        f.local.seed("/notes-old.md", "c");
        for path in ["/notes/a.md", "/notes/sub/b.md", "/notes-old.md"] {
            f.coordinator
                .open_document(FileRef::local(path))
                .await
                .unwrap();
        }

        f.coordinator.update_path("/notes", Some("/archive"));
        assert_eq!(
            f.coordinator.open_paths(),
            vec!["/archive/a.md", "/archive/sub/b.md", "/notes-old.md"]
        );

        f.coordinator.update_path("/archive/sub", None);
        assert_eq!(
            f.coordinator.open_paths(),
            vec!["/archive/a.md", "/notes-old.md"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_as_drops_snapshot_of_old_path() {
        let f = fixture(true, Settings::default());
        f.local.seed("/doc.md", "v0");
        f.local.set_dialog_path(Some("/copy.md".to_string()));
        f.coordinator
            .open_document(FileRef::local("/doc.md"))
            .await
            .unwrap();
        f.coordinator.mark_edited("/doc.md");
        f.coordinator.save("/doc.md", "v1").await.unwrap();
        assert!(f.coordinator.is_snapshot_pending("/doc.md"));

        f.coordinator.mark_edited("/doc.md");
        let saved = f.coordinator.save_as("/doc.md", "v2").await.unwrap();
        assert_eq!(saved, Some(FileRef::local("/copy.md")));
        assert!(!f.coordinator.is_snapshot_pending("/doc.md"));
        assert!(f.coordinator.is_snapshot_pending("/copy.md"));
        assert_eq!(f.coordinator.open_paths(), vec!["/copy.md"]);

        tokio::time::sleep(Duration::from_secs(61)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let history = &f.coordinator.history;
        assert!(history.list_versions("/doc.md").await.unwrap().is_empty());
        let copies = history.list_versions("/copy.md").await.unwrap();
        assert_eq!(copies.len(), 1);
        assert_eq!(
            history.get_version("/copy.md", &copies[0].id).await.as_deref(),
            Some("v2")
        );
        assert_eq!(f.local.read_text("/copy.md").await.unwrap(), "v2");
    }
}
