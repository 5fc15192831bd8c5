//! Keyed trailing-edge debouncer.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::debug;

#[derive(Debug)]
struct Pending {
    generation: u64,
    handle: AbortHandle,
}

/// Collapses bursts of scheduled tasks per key into the last one.
///
/// `schedule` starts a timer; a new `schedule` for the same key before the
/// timer fires cancels the earlier task. At most one task per key is pending.
/// Once a task has started running it is no longer cancellable.
#[derive(Debug, Default)]
pub struct KeyedDebouncer {
    pending: Arc<DashMap<String, Pending>>,
    generation: AtomicU64,
}

impl KeyedDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay` unless rescheduled or cancelled first.
    pub fn schedule<F>(&self, key: &str, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pending = Arc::clone(&self.pending);
        let owned_key = key.to_string();

        // The entry guard keeps the task's removal from running before the
        // new generation is recorded.
        let entry = self.pending.entry(key.to_string());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.remove_if(&owned_key, |_, p| p.generation == generation);
            task.await;
        })
        .abort_handle();

        match entry {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(Pending { generation, handle });
                debug!("Debounce reset for {}", key);
                previous.handle.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Pending { generation, handle });
            }
        }
    }

    /// Cancel the pending task for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some((_, p)) => {
                p.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending task.
    pub fn cancel_all(&self) {
        self.pending.retain(|_, p| {
            p.handle.abort();
            false
        });
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }
}

impl Drop for KeyedDebouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_only_last() {
        let debouncer = KeyedDebouncer::new();
        let runs = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let runs = Arc::clone(&runs);
            debouncer.schedule("doc", Duration::from_secs(60), async move {
                runs.lock().await.push(i);
            });
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        assert!(debouncer.is_pending("doc"));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(*runs.lock().await, vec![4]);
        assert!(!debouncer.is_pending("doc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent_and_cancellable() {
        let debouncer = KeyedDebouncer::new();
        let runs = Arc::new(Mutex::new(Vec::new()));

        for key in ["a", "b"] {
            let runs = Arc::clone(&runs);
            debouncer.schedule(key, Duration::from_secs(1), async move {
                runs.lock().await.push(key);
            });
        }
        assert!(debouncer.cancel("a"));
        assert!(!debouncer.cancel("a"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*runs.lock().await, vec!["b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_zero_delay_leaves_nothing_pending() {
        let debouncer = KeyedDebouncer::new();
        for _ in 0..200 {
            let (tx, rx) = tokio::sync::oneshot::channel();
            debouncer.schedule("doc", Duration::ZERO, async move {
                let _ = tx.send(());
            });
            rx.await.unwrap();
            assert!(!debouncer.is_pending("doc"));
        }
    }
}
