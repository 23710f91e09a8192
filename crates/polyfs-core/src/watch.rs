//! Reference-counted watch multiplexing.
//!
//! Subscriptions sharing a key `(canonical resource key, recursive,
//! excludes)` share one underlying `provider.watch`. The provider call
//! starts asynchronously; a handle disposed before startup completes
//! still gets the eventual subscription torn down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use polyfs_types::{Resource, WatchOptions};

use crate::provider::{Disposable, FileSystemProvider};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct WatchKey {
    resource: String,
    recursive: bool,
    excludes: String,
}

enum WatchState {
    /// `provider.watch` is in flight.
    Starting,
    /// Refcount hit zero (possibly before startup finished).
    Cancelled,
    Active(Disposable),
}

struct ActiveWatch {
    refs: usize,
    state: Arc<Mutex<WatchState>>,
}

/// Table of refcounted provider watch subscriptions.
pub struct WatcherTable {
    inner: Mutex<HashMap<WatchKey, ActiveWatch>>,
}

impl WatcherTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to changes for `resource`. The underlying provider
    /// watch is invoked once per key, no matter how many handles share
    /// it.
    pub fn watch(
        self: &Arc<Self>,
        provider: Arc<dyn FileSystemProvider>,
        resource: &Resource,
        options: WatchOptions,
    ) -> WatchHandle {
        let case_sensitive = provider.capabilities().is_case_sensitive();
        let key = WatchKey {
            resource: resource.canonical_key(case_sensitive),
            recursive: options.recursive,
            excludes: options.excludes.join(","),
        };

        let mut table = self.inner.lock().unwrap();
        match table.get_mut(&key) {
            Some(active) => {
                active.refs += 1;
            }
            None => {
                let state = Arc::new(Mutex::new(WatchState::Starting));
                table.insert(
                    key.clone(),
                    ActiveWatch {
                        refs: 1,
                        state: state.clone(),
                    },
                );

                let resource = resource.clone();
                tokio::spawn(async move {
                    match provider.watch(&resource, &options).await {
                        Ok(subscription) => {
                            let mut current = state.lock().unwrap();
                            match *current {
                                WatchState::Cancelled => {
                                    drop(current);
                                    subscription.dispose();
                                }
                                _ => *current = WatchState::Active(subscription),
                            }
                        }
                        Err(err) => {
                            tracing::warn!("failed to start watch on '{resource}': {err}");
                        }
                    }
                });
            }
        }

        WatchHandle {
            key,
            table: self.clone(),
            disposed: false,
        }
    }

    fn release(&self, key: &WatchKey) {
        let mut table = self.inner.lock().unwrap();
        let Some(active) = table.get_mut(key) else {
            return;
        };
        active.refs -= 1;
        if active.refs > 0 {
            return;
        }

        let active = table.remove(key).unwrap();
        drop(table);
        Self::teardown(&active);
    }

    fn teardown(active: &ActiveWatch) {
        let mut state = active.state.lock().unwrap();
        let previous = std::mem::replace(&mut *state, WatchState::Cancelled);
        drop(state);
        if let WatchState::Active(subscription) = previous {
            subscription.dispose();
        }
    }

    /// Number of live multiplexed subscriptions (for introspection and
    /// tests).
    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Dispose every active watch and clear the table.
    pub fn dispose_all(&self) {
        let drained: Vec<ActiveWatch> = {
            let mut table = self.inner.lock().unwrap();
            table.drain().map(|(_, active)| active).collect()
        };
        for active in &drained {
            Self::teardown(active);
        }
    }
}

impl Default for WatcherTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A caller's share of a multiplexed watch. Dispose (or drop) to
/// release it; the refcount is decremented exactly once per handle.
pub struct WatchHandle {
    key: WatchKey,
    table: Arc<WatcherTable>,
    disposed: bool,
}

impl WatchHandle {
    pub fn dispose(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.table.release(&self.key);
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("resource", &self.key.resource)
            .field("recursive", &self.key.recursive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemProvider;

    fn setup() -> (Arc<WatcherTable>, Arc<MemProvider>, Resource) {
        (
            Arc::new(WatcherTable::new()),
            Arc::new(MemProvider::new()),
            Resource::parse("mem:///watched").unwrap(),
        )
    }

    fn recursive() -> WatchOptions {
        WatchOptions {
            recursive: true,
            excludes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_same_key_shares_one_subscription() {
        let (table, provider, resource) = setup();

        let a = table.watch(provider.clone(), &resource, recursive());
        let b = table.watch(provider.clone(), &resource, recursive());
        tokio::task::yield_now().await;

        assert_eq!(provider.watch_invocations(), 1);
        assert_eq!(table.active_count(), 1);

        a.dispose();
        assert_eq!(table.active_count(), 1);
        b.dispose();
        assert_eq!(table.active_count(), 0);
        assert_eq!(provider.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_different_options_are_distinct_keys() {
        let (table, provider, resource) = setup();

        let _a = table.watch(provider.clone(), &resource, recursive());
        let _b = table.watch(
            provider.clone(),
            &resource,
            WatchOptions {
                recursive: false,
                excludes: Vec::new(),
            },
        );
        tokio::task::yield_now().await;

        assert_eq!(provider.watch_invocations(), 2);
        assert_eq!(table.active_count(), 2);
    }

    #[tokio::test]
    async fn test_dispose_before_startup_still_tears_down() {
        let (table, provider, resource) = setup();

        // No yield between watch and dispose: the spawned startup has
        // not run yet when the handle goes away.
        let handle = table.watch(provider.clone(), &resource, recursive());
        handle.dispose();
        tokio::task::yield_now().await;

        assert_eq!(table.active_count(), 0);
        assert_eq!(provider.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_drop_decrements_once() {
        let (table, provider, resource) = setup();

        let a = table.watch(provider.clone(), &resource, recursive());
        let _b = table.watch(provider.clone(), &resource, recursive());
        tokio::task::yield_now().await;

        // dispose() consumes the handle; the drop that follows must not
        // decrement a second time.
        a.dispose();
        assert_eq!(table.active_count(), 1);
    }

    #[tokio::test]
    async fn test_dispose_all() {
        let (table, provider, resource) = setup();
        let _a = table.watch(provider.clone(), &resource, recursive());
        let other = Resource::parse("mem:///other").unwrap();
        let _b = table.watch(provider.clone(), &other, recursive());
        tokio::task::yield_now().await;

        table.dispose_all();
        assert_eq!(table.active_count(), 0);
        assert_eq!(provider.active_watches(), 0);
    }
}
