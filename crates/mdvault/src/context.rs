//! Explicitly wired application services.

use std::sync::Arc;
use std::time::Duration;

use mdvault_core::{path, FileRef, StorageBackend, StorageError};
use mdvault_local::LocalBackend;
use mdvault_webdav::RemoteBackend;
use tracing::{info, warn};

use crate::asset::AssetResolver;
use crate::config::Config;
use crate::file_service::UnifiedFileService;
use crate::history::VersionHistoryStore;
use crate::recent::RecentStore;
use crate::save::{Dialog, SaveCoordinator, StaticDialog};
use crate::settings::{Settings, SettingsSource, StaticSettings};
use crate::tree::FileTreeCache;
use crate::workspace::Workspace;

/// Every service of the application, built once and shared by reference.
pub struct AppContext {
    pub files: UnifiedFileService,
    pub history: Arc<VersionHistoryStore>,
    pub tree: Arc<FileTreeCache>,
    pub sessions: Arc<SaveCoordinator>,
    pub workspace: Workspace,
    pub recent: Arc<RecentStore>,
    pub assets: AssetResolver,
    settings: Arc<dyn SettingsSource>,
    webdav: Option<Arc<RemoteBackend>>,
}

impl AppContext {
    /// Wire the services over the given backends. History lives on the local
    /// backend under `history_root`; the recent list is `recent.json` next
    /// to it.
    pub fn new(
        local: Arc<dyn StorageBackend>,
        remote: Arc<dyn StorageBackend>,
        history_root: impl Into<String>,
        settings: Arc<dyn SettingsSource>,
        dialog: Arc<dyn Dialog>,
    ) -> Self {
        let history_root = history_root.into();
        let recent_file = path::join(&[&path::dirname(&history_root), "recent.json"]);
        let files = UnifiedFileService::new(Arc::clone(&local), remote);
        let recent = Arc::new(RecentStore::new(Arc::clone(&local), recent_file));
        let history = Arc::new(VersionHistoryStore::new(local, history_root));
        let tree = Arc::new(FileTreeCache::new());
        let sessions = Arc::new(SaveCoordinator::new(
            files.clone(),
            Arc::clone(&history),
            Arc::clone(&tree),
            Arc::clone(&settings),
            dialog,
        ));
        let workspace = Workspace::new(
            files.clone(),
            Arc::clone(&tree),
            Arc::clone(&sessions),
            Arc::clone(&recent),
        );
        let assets = AssetResolver::new(files.clone());
        Self {
            files,
            history,
            tree,
            sessions,
            workspace,
            recent,
            assets,
            settings,
            webdav: None,
        }
    }

    /// Build the real local and WebDAV backends from process configuration,
    /// connecting to the server when one is configured.
    pub async fn from_config(config: &Config) -> Result<Self, StorageError> {
        let settings = match &config.settings {
            Some(file) => Settings::from_file(file)?,
            None => Settings::default(),
        };

        let local: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new());
        let remote = Arc::new(
            RemoteBackend::new().with_poll_interval(Duration::from_secs(config.poll_interval_secs)),
        );

        if let Some(url) = &config.webdav_url {
            let user = config.webdav_user.as_deref().unwrap_or_default();
            let password = config.webdav_password.as_deref().unwrap_or_default();
            if remote.connect(url, user, password).await? {
                info!("  WebDAV: {}", url);
            } else {
                warn!("  WebDAV: {} unreachable, remote paths will fail", url);
            }
        }

        let history_root = config.history_root().display().to_string();
        info!("  History: {}", history_root);

        let mut context = Self::new(
            local,
            remote.clone(),
            history_root,
            Arc::new(StaticSettings::new(settings)),
            Arc::new(StaticDialog { overwrite: false }),
        );
        context.webdav = Some(remote);
        Ok(context)
    }

    /// Settings as of now.
    pub fn settings(&self) -> Settings {
        self.settings.current()
    }

    /// The WebDAV backend, when built from configuration.
    pub fn webdav(&self) -> Option<&Arc<RemoteBackend>> {
        self.webdav.as_ref()
    }
}

/// Descriptor for a user-typed address: `http(s)` URLs are remote,
/// everything else is a local path.
pub fn route(address: &str) -> FileRef {
    match path::parse_url(address) {
        Some(url) if matches!(url.scheme(), "http" | "https") => {
            FileRef::remote(path::normalize(address))
        }
        _ => FileRef::local(address),
    }
}
