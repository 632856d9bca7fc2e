//! Subscriber registry.
//!
//! Tracks, per key, the local callbacks observing that key and the notifier
//! registration that feeds it external changes. The notifier registration
//! lives exactly as long as the key has at least one subscriber.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::notify::ListenerGuard;

/// Callback invoked with a key's new value, `None` when absent.
pub type SubscriberCallback = Arc<dyn Fn(Option<&str>) + Send + Sync>;

pub type SubscriberId = u64;

#[derive(Default)]
struct KeySubscribers {
    callbacks: BTreeMap<SubscriberId, SubscriberCallback>,
    listener: Option<ListenerGuard>,
}

#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    keys: HashMap<String, KeySubscribers>,
    last_id: SubscriberId,
}

impl SubscriberRegistry {
    /// Register a callback. The flag is true when this is the key's first
    /// subscriber, i.e. when a notifier listener should be attached.
    pub(crate) fn insert(
        &mut self,
        key: &str,
        callback: SubscriberCallback,
    ) -> (SubscriberId, bool) {
        self.last_id += 1;
        let id = self.last_id;
        let entry = self.keys.entry(key.to_string()).or_default();
        let first = entry.callbacks.is_empty() && entry.listener.is_none();
        entry.callbacks.insert(id, callback);
        (id, first)
    }

    /// Store the notifier registration for `key`.
    ///
    /// Hands the guard back when the key lost all subscribers in the meantime
    /// or already has a listener; the caller drops it outside the engine lock.
    pub(crate) fn attach_listener(
        &mut self,
        key: &str,
        guard: ListenerGuard,
    ) -> Result<(), ListenerGuard> {
        match self.keys.get_mut(key) {
            Some(entry) if entry.listener.is_none() => {
                entry.listener = Some(guard);
                Ok(())
            }
            _ => Err(guard),
        }
    }

    /// Remove a callback. When it was the key's last one, the key is dropped
    /// from the registry and its notifier guard returned for disposal.
    pub(crate) fn remove(&mut self, key: &str, id: SubscriberId) -> Option<ListenerGuard> {
        let entry = self.keys.get_mut(key)?;
        entry.callbacks.remove(&id);
        if !entry.callbacks.is_empty() {
            return None;
        }
        self.keys.remove(key).and_then(|entry| entry.listener)
    }

    /// Callbacks for `key`, cloned so they can run without the lock held.
    pub(crate) fn snapshot(&self, key: &str) -> Vec<SubscriberCallback> {
        self.keys
            .get(key)
            .map(|entry| entry.callbacks.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, key: &str) -> usize {
        self.keys
            .get(key)
            .map_or(0, |entry| entry.callbacks.len())
    }

    pub(crate) fn has_listener(&self, key: &str) -> bool {
        self.keys
            .get(key)
            .is_some_and(|entry| entry.listener.is_some())
    }

    pub(crate) fn total(&self) -> usize {
        self.keys.values().map(|entry| entry.callbacks.len()).sum()
    }
}
