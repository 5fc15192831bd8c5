//! Filtering of platform and backend noise entries from directory listings.

use std::sync::Arc;

use crate::entry::StorageLocation;

/// Predicate returning `true` for names that should be hidden from listings.
pub type IgnorePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Host platform, for platform-specific noise files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Other
        }
    }
}

/// Ignore rules for one platform and storage location.
#[derive(Debug, Clone, Copy)]
pub struct IgnoreFilter {
    platform: Platform,
    location: StorageLocation,
}

impl IgnoreFilter {
    pub fn new(platform: Platform, location: StorageLocation) -> Self {
        Self { platform, location }
    }

    /// Rules for the host platform.
    pub fn for_location(location: StorageLocation) -> Self {
        Self::new(Platform::current(), location)
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        is_universal_noise(name)
            || self.is_platform_noise(name)
            || self.is_location_noise(name)
    }

    pub fn into_predicate(self) -> IgnorePredicate {
        Arc::new(move |name| self.is_ignored(name))
    }

    fn is_platform_noise(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        match self.platform {
            Platform::Windows => {
                matches!(lower.as_str(), "thumbs.db" | "desktop.ini" | "ehthumbs.db")
            }
            Platform::MacOs => {
                lower == ".ds_store"
                    || name.starts_with("._")
                    || lower.starts_with(".spotlight-")
                    || lower.starts_with(".trashes")
                    || lower.starts_with(".fseventsd")
            }
            Platform::Linux => lower == ".directory" || lower.starts_with(".trash-"),
            Platform::Other => false,
        }
    }

    fn is_location_noise(&self, name: &str) -> bool {
        match self.location {
            StorageLocation::Remote => {
                let lower = name.to_lowercase();
                lower == ".well-known" || lower == ".htaccess"
            }
            StorageLocation::Local => false,
        }
    }
}

fn is_universal_noise(name: &str) -> bool {
    let lower = name.to_lowercase();
    name.starts_with('.')
        || name.starts_with('~')
        || lower.ends_with(".tmp")
        || lower.ends_with(".bak")
        || lower == "npm-debug.log"
}
