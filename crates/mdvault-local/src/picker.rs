use std::path::Path;
use std::process::ExitStatus;

use async_trait::async_trait;
use mdvault_core::{DialogOptions, StorageError};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Host-provided native file picker.
///
/// `Ok(None)` means the user cancelled.
#[async_trait]
pub trait FilePicker: Send + Sync {
    async fn pick_save_path(&self, options: DialogOptions) -> Result<Option<String>, StorageError>;

    async fn pick_open_path(&self, options: DialogOptions) -> Result<Option<String>, StorageError>;
}

/// Picker answering every request with fixed paths. Used by headless hosts
/// and tests.
#[derive(Debug, Clone, Default)]
pub struct FixedPicker {
    pub save_path: Option<String>,
    pub open_path: Option<String>,
}

#[async_trait]
impl FilePicker for FixedPicker {
    async fn pick_save_path(&self, _options: DialogOptions) -> Result<Option<String>, StorageError> {
        Ok(self.save_path.clone())
    }

    async fn pick_open_path(&self, _options: DialogOptions) -> Result<Option<String>, StorageError> {
        Ok(self.open_path.clone())
    }
}

/// Open the platform file manager with `path` selected (or its parent shown).
pub(crate) fn reveal_in_file_manager(path: &Path) -> Result<(), StorageError> {
    let shown = path.display().to_string();
    let mut command = if cfg!(target_os = "macos") {
        let mut c = Command::new("open");
        c.arg("-R").arg(path);
        c
    } else if cfg!(target_os = "windows") {
        let mut c = Command::new("explorer");
        c.arg(format!("/select,{}", shown));
        c
    } else {
        let target = if path.is_dir() {
            path
        } else {
            path.parent().unwrap_or(path)
        };
        let mut c = Command::new("xdg-open");
        c.arg(target);
        c
    };

    debug!("Revealing {} in file manager", shown);
    spawn_reaped(&mut command)
        .map(|_| ())
        .map_err(|e| StorageError::Io(format!("failed to reveal {}: {}", shown, e)))
}

/// Start `command` and wait for it in the background so the child is
/// reaped once it exits.
fn spawn_reaped(command: &mut Command) -> std::io::Result<JoinHandle<Option<ExitStatus>>> {
    let mut child = command.spawn()?;
    Ok(tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("Failed to wait for file manager: {}", e);
                None
            }
        }
    }))
}
