//! Core types and traits for mdvault storage backends.
//!
//! This crate defines the [`StorageBackend`] contract shared by local and
//! WebDAV storage, the [`FileEntry`] model, the [`StorageError`] taxonomy and
//! the URL-aware path helpers in [`path`].

pub mod backend;
pub mod entry;
pub mod error;
pub mod ignore;
pub mod memory;
pub mod path;

pub use backend::{ChangeCallback, DialogFilter, DialogOptions, StorageBackend, WatchHandle};
pub use entry::{local_version, sort_entries, FileEntry, FileRef, StorageLocation};
pub use error::{ErrorKind, StorageError};
pub use ignore::{IgnoreFilter, IgnorePredicate, Platform};
pub use memory::MemoryBackend;
