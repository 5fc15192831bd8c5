use std::path::Path;

use mdvault_core::{ChangeCallback, WatchHandle};
use notify::{EventKind, RecursiveMode, Watcher};
use tracing::{debug, warn};

/// Start an OS-level watch on `path` (direct children only).
///
/// Access events are dropped so that reading a file never looks like a
/// change. Any setup failure is logged and yields `None`.
pub(crate) fn watch_path(path: &Path, callback: ChangeCallback) -> Option<WatchHandle> {
    let watched = path.display().to_string();
    let mut watcher = match notify::recommended_watcher(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) if matches!(event.kind, EventKind::Access(_)) => {}
            Ok(event) => {
                debug!("Change detected: {:?}", event.paths);
                callback();
            }
            Err(e) => warn!("Watch error: {}", e),
        },
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!("Failed to create watcher for {}: {}", watched, e);
            return None;
        }
    };

    if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
        warn!("Failed to watch {}: {}", watched, e);
        return None;
    }

    debug!("Watching {}", watched);
    Some(WatchHandle::new(move || {
        debug!("Stopped watching {}", watched);
        drop(watcher);
    }))
}
