//! Per-path mutual exclusion for saves.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Lazily created async mutex per path.
///
/// Waiters queue in FIFO order behind the holder. Locks are kept after use;
/// [`PathLocks::prune_idle`] drops the ones nobody holds or waits on.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`. Released when the guard drops.
    pub async fn lock(&self, path: &str) -> OwnedMutexGuard<()> {
        // Clone out of the map so no shard lock is held across the await.
        let mutex = self
            .locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Whether `path` is currently held.
    pub fn is_locked(&self, path: &str) -> bool {
        self.locks
            .get(path)
            .is_some_and(|m| m.try_lock().is_err())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop locks with no holder and no waiter. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        // Holders and waiters each own a clone of the Arc.
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        let removed = before.saturating_sub(self.locks.len());
        if removed > 0 {
            debug!("Pruned {} idle path locks", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_path_serializes() {
        let locks = Arc::new(PathLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("/doc.md").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_paths_do_not_block() {
        let locks = PathLocks::new();
        let _a = locks.lock("/a.md").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("/b.md")).await;
        assert!(b.is_ok());
        assert!(locks.is_locked("/a.md"));
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = PathLocks::new();
        let held = locks.lock("/held.md").await;
        drop(locks.lock("/idle.md").await);
        assert_eq!(locks.len(), 2);

        assert_eq!(locks.prune_idle(), 1);
        assert!(locks.is_locked("/held.md"));
        drop(held);
        assert_eq!(locks.prune_idle(), 1);
        assert!(locks.is_empty());
    }
}
