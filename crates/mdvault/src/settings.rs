//! User-facing settings read by the save and history paths.

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use mdvault_core::StorageError;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SaveSettings {
    pub auto_save: bool,
    /// Seconds of inactivity before an automatic save
    pub auto_save_interval_secs: u64,
}

impl Default for SaveSettings {
    fn default() -> Self {
        Self {
            auto_save: true,
            auto_save_interval_secs: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistorySettings {
    /// Record a snapshot on save
    pub auto_save: bool,
    /// Minutes a burst of saves is collapsed into one snapshot
    pub auto_save_interval_mins: u64,
    /// Snapshots kept per file; 0 keeps everything
    pub max_num: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            auto_save: true,
            auto_save_interval_mins: 1,
            max_num: 50,
        }
    }
}

/// How embedded image references are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImagePathType {
    #[default]
    Relative,
    Absolute,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageSettings {
    pub path_type: ImagePathType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub save: SaveSettings,
    pub history: HistorySettings,
    pub image: ImageSettings,
}

impl Settings {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, StorageError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StorageError::from_io(e, &path.display().to_string()))?;
        let settings = serde_json::from_str(&text)?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn auto_save_delay(&self) -> Duration {
        Duration::from_secs(self.save.auto_save_interval_secs)
    }

    pub fn history_delay(&self) -> Duration {
        Duration::from_secs(self.history.auto_save_interval_mins * 60)
    }
}

/// Read-only view of the current settings, re-read on every use.
pub trait SettingsSource: Send + Sync {
    fn current(&self) -> Settings;
}

/// Settings held in memory and replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticSettings {
    settings: RwLock<Settings>,
}

impl StaticSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    pub fn replace(&self, settings: Settings) {
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = settings;
    }
}

impl SettingsSource for StaticSettings {
    fn current(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
