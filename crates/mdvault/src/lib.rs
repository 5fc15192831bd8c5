//! Storage and versioning layer of the mdvault markdown editor.
//!
//! [`UnifiedFileService`] dispatches file operations to the local or WebDAV
//! backend. [`SaveCoordinator`] serializes saves per path and detects
//! external changes. [`VersionHistoryStore`] keeps bounded snapshot history
//! per file. [`FileTreeCache`] and [`Workspace`] maintain the opened trees,
//! and [`RecentStore`] remembers which ones were opened lately.
//! [`AppContext`] wires all of them together.

pub mod asset;
pub mod config;
pub mod context;
pub mod debounce;
pub mod file_service;
pub mod history;
pub mod locks;
pub mod recent;
pub mod save;
pub mod settings;
pub mod tree;
pub mod workspace;

pub use asset::{asset_reference, default_asset_dir, AssetResolver, AssetSource};
pub use config::{Command, Config};
pub use context::{route, AppContext};
pub use debounce::KeyedDebouncer;
pub use file_service::UnifiedFileService;
pub use history::{NewVersion, VersionHistoryStore, VersionInfo};
pub use locks::PathLocks;
pub use recent::{RecentFile, RecentStore, MAX_RECENT_FILES};
pub use save::{Dialog, DocumentState, SaveCoordinator, SaveOutcome, StaticDialog};
pub use settings::{ImagePathType, Settings, SettingsSource, StaticSettings};
pub use tree::FileTreeCache;
pub use workspace::Workspace;

pub use mdvault_core::{FileEntry, FileRef, StorageBackend, StorageError, StorageLocation};
