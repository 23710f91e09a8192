//! Per-resource write serialization.
//!
//! Each canonical resource key owns a FIFO queue of pending write tasks.
//! tokio's `Mutex` is fair, so lock acquisition order is submission
//! order; the table entry self-deletes when the last waiter drops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Slot {
    lock: Arc<AsyncMutex<()>>,
    /// Holders plus waiters. The entry is removed when this drops to 0.
    waiters: usize,
}

/// Table of per-canonical-key write queues.
pub struct WriteQueues {
    inner: Mutex<HashMap<String, Slot>>,
}

impl WriteQueues {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Join the queue for `key` and wait for the turn. The returned
    /// guard holds the slot until dropped.
    pub async fn enqueue(self: &Arc<Self>, key: String) -> WriteGuard {
        let lock = {
            let mut table = self.inner.lock().unwrap();
            let slot = table.entry(key.clone()).or_insert_with(|| Slot {
                lock: Arc::new(AsyncMutex::new(())),
                waiters: 0,
            });
            slot.waiters += 1;
            slot.lock.clone()
        };

        let permit = lock.lock_owned().await;
        WriteGuard {
            key,
            queues: self.clone(),
            _permit: permit,
        }
    }

    /// Number of keys with live queues (for introspection and tests).
    pub fn active_keys(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    fn release(&self, key: &str) {
        let mut table = self.inner.lock().unwrap();
        if let Some(slot) = table.get_mut(key) {
            slot.waiters -= 1;
            if slot.waiters == 0 {
                table.remove(key);
            }
        }
    }
}

impl Default for WriteQueues {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to a write-queue slot. Dropping it hands the slot
/// to the next waiter in FIFO order.
pub struct WriteGuard {
    key: String,
    queues: Arc<WriteQueues>,
    _permit: OwnedMutexGuard<()>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.queues.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_submission_order() {
        let queues = Arc::new(WriteQueues::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let queues = queues.clone();
            let log = log.clone();
            // Guards are requested in order before any task runs.
            let guard_fut = {
                let queues = queues.clone();
                async move { queues.enqueue("key".to_string()).await }
            };
            tasks.push(tokio::spawn(async move {
                let _guard = guard_fut.await;
                log.lock().unwrap().push(i);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }));
            // Let each task reach the queue before spawning the next.
            tokio::task::yield_now().await;
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*log.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_no_overlap_per_key() {
        let queues = Arc::new(WriteQueues::new());
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let queues = queues.clone();
            let running = running.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = queues.enqueue("shared".to_string()).await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_concurrently() {
        let queues = Arc::new(WriteQueues::new());

        let a = queues.enqueue("a".to_string()).await;
        let b = queues.enqueue("b".to_string()).await;
        assert_eq!(queues.active_keys(), 2);
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn test_table_self_cleans_on_drain() {
        let queues = Arc::new(WriteQueues::new());
        {
            let _guard = queues.enqueue("key".to_string()).await;
            assert_eq!(queues.active_keys(), 1);
        }
        assert_eq!(queues.active_keys(), 0);
    }
}
