use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use metrics::counter;
use tracing::debug;
use uuid::Uuid;

use crate::cache::lock::Recover;
use crate::cache::metrics::EXTERNAL_CHANGE_TOTAL;
use crate::storage::{StorageBackend, StorageOp};

use super::{ChangeCallback, ChangeNotifier, ListenerGuard};

const SOURCE: &str = "notify::hub";

struct HubListener {
    origin: Uuid,
    key: String,
    callback: ChangeCallback,
}

#[derive(Default)]
struct HubInner {
    listeners: Mutex<HashMap<u64, HubListener>>,
    next_id: AtomicU64,
}

impl HubInner {
    fn publish(&self, origin: Uuid, key: &str, value: Option<&str>) {
        let targets: Vec<ChangeCallback> = self
            .listeners
            .lock()
            .recover(SOURCE, "publish")
            .values()
            .filter(|listener| listener.origin != origin && listener.key == key)
            .map(|listener| listener.callback.clone())
            .collect();

        debug!(
            key,
            origin = %origin,
            listeners = targets.len(),
            removed = value.is_none(),
            "Broadcasting storage change"
        );

        for callback in targets {
            counter!(EXTERNAL_CHANGE_TOTAL).increment(1);
            callback(value);
        }
    }
}

/// In-process broadcast of storage mutations between sibling contexts.
///
/// Each context wraps the shared device store with [`ChangeHub::attach`]. A
/// write made through one context's [`BroadcastStorage`] is reported to the
/// listeners registered through every *other* context's [`HubEndpoint`],
/// the way a browser reports storage events to other tabs only.
#[derive(Clone, Default)]
pub struct ChangeHub {
    inner: Arc<HubInner>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a new context to the hub.
    pub fn attach(&self, storage: Arc<dyn StorageBackend>) -> (BroadcastStorage, HubEndpoint) {
        let origin = Uuid::new_v4();
        let endpoint = HubEndpoint {
            origin,
            hub: self.inner.clone(),
        };
        let storage = BroadcastStorage {
            inner: storage,
            origin,
            hub: self.inner.clone(),
        };
        (storage, endpoint)
    }

    /// Report a change made outside every attached context.
    pub fn publish(&self, key: &str, value: Option<&str>) {
        self.inner.publish(Uuid::nil(), key, value);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().recover(SOURCE, "listener_count").len()
    }
}

/// Notifier half of an attached context.
#[derive(Clone)]
pub struct HubEndpoint {
    origin: Uuid,
    hub: Arc<HubInner>,
}

impl HubEndpoint {
    pub fn origin(&self) -> Uuid {
        self.origin
    }
}

impl ChangeNotifier for HubEndpoint {
    fn register_key_listener(&self, key: &str, on_change: ChangeCallback) -> ListenerGuard {
        let id = self.hub.next_id.fetch_add(1, Ordering::Relaxed);
        self.hub.listeners.lock().recover(SOURCE, "register").insert(
            id,
            HubListener {
                origin: self.origin,
                key: key.to_string(),
                callback: on_change,
            },
        );

        let hub: Weak<HubInner> = Arc::downgrade(&self.hub);
        ListenerGuard::new(move || {
            if let Some(hub) = hub.upgrade() {
                hub.listeners.lock().recover(SOURCE, "unregister").remove(&id);
            }
        })
    }
}

/// Storage half of an attached context: forwards to the shared store and
/// announces mutations to the other contexts.
///
/// Only actual changes are announced. Storing the value a key already holds,
/// or removing an absent key, stays silent.
pub struct BroadcastStorage {
    inner: Arc<dyn StorageBackend>,
    origin: Uuid,
    hub: Arc<HubInner>,
}

impl BroadcastStorage {
    fn mutate(&self, key: &str, value: Option<&str>) -> StorageOp<()> {
        match self.inner.get_item(key) {
            StorageOp::Ready(Err(error)) => StorageOp::failed(error),
            StorageOp::Ready(Ok(previous)) => {
                let changed = previous.as_deref() != value;
                match apply(self.inner.as_ref(), key, value) {
                    StorageOp::Ready(Ok(())) => {
                        if changed {
                            self.hub.publish(self.origin, key, value);
                        }
                        StorageOp::ready(())
                    }
                    StorageOp::Ready(Err(error)) => StorageOp::failed(error),
                    StorageOp::Pending(operation) => {
                        let hub = self.hub.clone();
                        let origin = self.origin;
                        let key = key.to_string();
                        let value = value.map(str::to_owned);
                        StorageOp::pending(async move {
                            operation.await?;
                            if changed {
                                hub.publish(origin, &key, value.as_deref());
                            }
                            Ok(())
                        })
                    }
                }
            }
            StorageOp::Pending(read) => {
                let inner = self.inner.clone();
                let hub = self.hub.clone();
                let origin = self.origin;
                let key = key.to_string();
                let value = value.map(str::to_owned);
                StorageOp::pending(async move {
                    let previous = read.await?;
                    apply(inner.as_ref(), &key, value.as_deref()).await?;
                    if previous != value {
                        hub.publish(origin, &key, value.as_deref());
                    }
                    Ok(())
                })
            }
        }
    }
}

fn apply(storage: &dyn StorageBackend, key: &str, value: Option<&str>) -> StorageOp<()> {
    match value {
        Some(value) => storage.set_item(key, value),
        None => storage.remove_item(key),
    }
}

impl StorageBackend for BroadcastStorage {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn get_item(&self, key: &str) -> StorageOp<Option<String>> {
        self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> StorageOp<()> {
        self.mutate(key, Some(value))
    }

    fn remove_item(&self, key: &str) -> StorageOp<()> {
        self.mutate(key, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn recorder() -> (Arc<Mutex<Vec<Option<String>>>>, ChangeCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ChangeCallback = Arc::new(move |value: Option<&str>| {
            sink.lock()
                .expect("recorder lock")
                .push(value.map(str::to_owned));
        });
        (seen, callback)
    }

    #[test]
    fn writes_reach_other_contexts_only() {
        let device: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let hub = ChangeHub::new();
        let (storage_a, endpoint_a) = hub.attach(device.clone());
        let (_storage_b, endpoint_b) = hub.attach(device);

        let (seen_a, callback_a) = recorder();
        let (seen_b, callback_b) = recorder();
        let _guard_a = endpoint_a.register_key_listener("theme", callback_a);
        let _guard_b = endpoint_b.register_key_listener("theme", callback_b);

        storage_a.set_item("theme", "dark");
        storage_a.remove_item("theme");

        assert!(seen_a.lock().expect("lock").is_empty());
        assert_eq!(
            *seen_b.lock().expect("lock"),
            vec![Some("dark".to_string()), None]
        );
    }

    #[test]
    fn unchanged_values_are_not_announced() {
        let device: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let hub = ChangeHub::new();
        let (storage_a, _endpoint_a) = hub.attach(device.clone());
        let (_storage_b, endpoint_b) = hub.attach(device);

        let (seen, callback) = recorder();
        let _guard = endpoint_b.register_key_listener("theme", callback);

        storage_a.set_item("theme", "dark");
        storage_a.set_item("theme", "dark");
        storage_a.remove_item("theme");
        storage_a.remove_item("theme");

        assert_eq!(
            *seen.lock().expect("lock"),
            vec![Some("dark".to_string()), None]
        );
    }

    #[test]
    fn listeners_only_hear_their_key() {
        let device: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let hub = ChangeHub::new();
        let (storage_a, _endpoint_a) = hub.attach(device.clone());
        let (_storage_b, endpoint_b) = hub.attach(device);

        let (seen, callback) = recorder();
        let _guard = endpoint_b.register_key_listener("theme", callback);

        storage_a.set_item("locale", "fr");
        assert!(seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn dropping_guard_unregisters() {
        let hub = ChangeHub::new();
        let (_storage, endpoint) = hub.attach(Arc::new(MemoryStorage::new()));
        let (_seen, callback) = recorder();

        let guard = endpoint.register_key_listener("theme", callback);
        assert_eq!(hub.listener_count(), 1);

        drop(guard);
        assert_eq!(hub.listener_count(), 0);
    }

    #[test]
    fn external_publish_reaches_every_context() {
        let hub = ChangeHub::new();
        let (_storage, endpoint) = hub.attach(Arc::new(MemoryStorage::new()));
        let (seen, callback) = recorder();
        let _guard = endpoint.register_key_listener("theme", callback);

        hub.publish("theme", Some("light"));
        assert_eq!(
            *seen.lock().expect("lock"),
            vec![Some("light".to_string())]
        );
    }

    #[test]
    fn writes_pass_through_to_shared_store() {
        let device = Arc::new(MemoryStorage::new());
        let hub = ChangeHub::new();
        let (storage, _endpoint) = hub.attach(device.clone());

        storage.set_item("k", "v");
        assert_eq!(device.peek("k").as_deref(), Some("v"));
    }
}
