//! Generic set of TTL-bound items with a cancellation-safe expiry callback.
//!
//! Each stored item owns a timer task. Expiry fires `on_timeout` exactly once;
//! an explicit [`TtlStore::remove`] (or a replacing [`TtlStore::add`]) must
//! suppress that callback even if the timer has already fired and is racing
//! with the cancellation, which is why every entry carries an `active` flag
//! (`Armed -> Fired | Cancelled`) cleared before the timer is aborted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// An item that can live in a [`TtlStore`].
///
/// `Key` is the semantic identity used for equality/replacement; ttl is
/// looked up separately so that replacing an item with a different ttl still
/// replaces the same logical slot.
pub trait TtlItem: Clone + Send + Sync + 'static {
    /// Semantic identity, independent of ttl or timestamp.
    type Key: std::hash::Hash + Eq + Clone + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
}

struct Entry<T> {
    value: T,
    active: Arc<std::sync::atomic::AtomicBool>,
    handle: JoinHandle<()>,
}

/// A generic TTL-bound item store.
///
/// Requires a Tokio runtime: each `add` spawns a timer task.
pub struct TtlStore<T: TtlItem> {
    entries: Arc<Mutex<HashMap<T::Key, Entry<T>>>>,
}

impl<T: TtlItem> TtlStore<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Insert `item`, expiring after `ttl` and invoking `on_timeout(item)` if
    /// it is not removed or replaced first. Replacing an equal-keyed item
    /// cancels its previous timer without invoking its callback.
    pub async fn add<F>(&self, item: T, ttl: Duration, on_timeout: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        let key = item.key();
        self.cancel(&key).await;

        let active = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let active_for_task = active.clone();
        let entries = self.entries.clone();
        let value_for_task = item.clone();
        let key_for_task = key.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            // Fired: remove ourselves, then invoke the callback only if
            // nobody cancelled us in the meantime.
            let mut guard = entries.lock().await;
            if guard.remove(&key_for_task).is_some() && active_for_task.load(std::sync::atomic::Ordering::SeqCst) {
                drop(guard);
                on_timeout(value_for_task);
            }
        });

        let mut guard = self.entries.lock().await;
        guard.insert(
            key,
            Entry {
                value: item,
                active,
                handle,
            },
        );
    }

    /// Remove `key` if present, cancelling its timer without invoking the
    /// callback. A no-op if absent.
    pub async fn remove(&self, key: &T::Key) {
        self.cancel(key).await;
    }

    async fn cancel(&self, key: &T::Key) {
        let mut guard = self.entries.lock().await;
        if let Some(entry) = guard.remove(key) {
            entry.active.store(false, std::sync::atomic::Ordering::SeqCst);
            entry.handle.abort();
        }
    }

    /// True if `key` is currently present.
    pub async fn contains(&self, key: &T::Key) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    /// Snapshot of every currently stored item. Unordered.
    pub async fn items(&self) -> Vec<T> {
        self.entries.lock().await.values().map(|e| e.value.clone()).collect()
    }

    /// Number of currently stored items.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// True if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<T: TtlItem> Default for TtlStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Thing(u32);

    impl TtlItem for Thing {
        type Key = u32;
        fn key(&self) -> u32 {
            self.0
        }
    }

    #[tokio::test]
    async fn remove_before_ttl_suppresses_callback() {
        let store: TtlStore<Thing> = TtlStore::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        store
            .add(Thing(1), Duration::from_millis(50), move |_| {
                fired_clone.store(true, Ordering::SeqCst);
            })
            .await;

        store.remove(&1).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(!fired.load(Ordering::SeqCst));
        assert!(!store.contains(&1).await);
    }

    #[tokio::test]
    async fn expiry_invokes_callback_exactly_once() {
        let store: TtlStore<Thing> = TtlStore::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        store
            .add(Thing(1), Duration::from_millis(20), move |item| {
                assert_eq!(item, Thing(1));
                fired_clone.store(true, Ordering::SeqCst);
            })
            .await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(fired.load(Ordering::SeqCst));
        assert!(!store.contains(&1).await);
    }

    #[tokio::test]
    async fn replacing_an_item_cancels_the_old_timer() {
        let store: TtlStore<Thing> = TtlStore::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        store
            .add(Thing(1), Duration::from_millis(20), move |_| {
                fired_clone.store(true, Ordering::SeqCst);
            })
            .await;

        // Replace before the first timer fires.
        store.add(Thing(1), Duration::from_millis(200), |_| {}).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert!(store.contains(&1).await);
    }
}
