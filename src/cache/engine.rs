//! The persistence engine.
//!
//! Owns the slot map and the subscriber registry behind one lock. Slot
//! transitions happen under the lock; subscriber callbacks and backend calls
//! (other than the initial `get_item`) run after it is released, so a callback
//! may freely call back into the engine. Callbacks of one key run in commit
//! order, see [`super::delivery`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::FutureExt;
use metrics::{counter, gauge};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::notify::{ChangeCallback, ChangeNotifier};
use crate::storage::{StorageBackend, StorageError, StorageOp};

use super::delivery::DeliveryQueues;
use super::lock::Recover;
use super::metrics::{
    LOAD_FAILED_TOTAL, LOAD_TOTAL, STALE_LOAD_DISCARDED_TOTAL, SUBSCRIBERS, WRITE_TOTAL,
};
use super::registry::{SubscriberCallback, SubscriberId, SubscriberRegistry};
use super::sequencer::WriteSequencer;
use super::store::{LoadHandle, LoadId, Slot, SlotState, SlotStore};

const SOURCE: &str = "cache::engine";

#[derive(Default)]
struct EngineState {
    slots: SlotStore,
    subscribers: SubscriberRegistry,
    writes: WriteSequencer,
    deliveries: DeliveryQueues,
}

/// A value transition applied under the lock. Its delivery is queued and
/// runs once the lock is released.
struct Commit {
    superseded: Option<LoadId>,
    subscribers: usize,
    version: u64,
}

impl EngineState {
    fn commit(&mut self, key: &str, value: Option<String>) -> Commit {
        let callbacks = self.subscribers.snapshot(key);
        let subscribers = callbacks.len();
        self.deliveries.push(key, callbacks, value.clone());
        Commit {
            superseded: self.slots.resolve(key, value),
            subscribers,
            version: self.writes.bump(key),
        }
    }
}

struct EngineInner {
    storage: Arc<dyn StorageBackend>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
    runtime: Option<Handle>,
    state: Mutex<EngineState>,
}

enum Driver {
    Ambient,
    Runtime(Handle),
    Manual,
}

/// Builder for [`PersistenceEngine`].
pub struct EngineBuilder {
    storage: Arc<dyn StorageBackend>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
    driver: Driver,
}

impl EngineBuilder {
    /// Learn about writes made by other contexts.
    pub fn notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Drive pending loads and writes on `handle`.
    ///
    /// Without this the runtime current at [`build`](Self::build) is used,
    /// if there is one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.driver = Driver::Runtime(handle);
        self
    }

    /// Never spawn. Pending loads are applied when a reader awaits them. A
    /// pending write runs when its [`StorageOp`], or that of a later write of
    /// the same key, is awaited.
    pub fn manual(mut self) -> Self {
        self.driver = Driver::Manual;
        self
    }

    pub fn build(self) -> PersistenceEngine {
        let runtime = match self.driver {
            Driver::Ambient => Handle::try_current().ok(),
            Driver::Runtime(handle) => Some(handle),
            Driver::Manual => None,
        };

        PersistenceEngine {
            inner: Arc::new(EngineInner {
                storage: self.storage,
                notifier: self.notifier,
                runtime,
                state: Mutex::new(EngineState::default()),
            }),
        }
    }
}

/// Contents of a slot as seen by a reader.
#[derive(Debug)]
pub enum SlotRead {
    Ready(Option<String>),
    Pending(PendingLoad),
}

impl SlotRead {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The resolved value; `None` while pending or when absent.
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Ready(value) => value.as_deref(),
            Self::Pending(_) => None,
        }
    }
}

/// A load that has not settled yet.
///
/// Awaiting it yields the backend's answer. The first waiter to observe the
/// answer applies it to the slot, unless a write superseded the load.
#[derive(Clone)]
pub struct PendingLoad {
    key: String,
    handle: LoadHandle,
    engine: PersistenceEngine,
}

impl PendingLoad {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn load_id(&self) -> LoadId {
        self.handle.id
    }

    pub async fn wait(self) -> Result<Option<String>, StorageError> {
        let result = self.handle.load.clone().await;
        if self.handle.settle() {
            self.engine.finish_load(&self.key, self.handle.id, &result);
        }
        result
    }
}

impl fmt::Debug for PendingLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLoad")
            .field("key", &self.key)
            .field("load_id", &self.handle.id)
            .finish()
    }
}

/// Memory cache over a storage backend with per-key subscriptions.
///
/// Cloning is cheap and yields a handle to the same cache.
#[derive(Clone)]
pub struct PersistenceEngine {
    inner: Arc<EngineInner>,
}

impl PersistenceEngine {
    pub fn builder(storage: Arc<dyn StorageBackend>) -> EngineBuilder {
        EngineBuilder {
            storage,
            notifier: None,
            driver: Driver::Ambient,
        }
    }

    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self::builder(storage).build()
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.inner.storage
    }

    /// Current contents of `key`'s slot, loading it on first touch.
    ///
    /// The first touch issues exactly one `get_item`. A settled answer is
    /// stored as is. A pending answer leaves the slot pending; when it
    /// settles, and only if no write replaced it in the meantime, the value
    /// is applied like a [`write`](Self::write). A synchronous backend error
    /// is returned and leaves the slot unloaded.
    pub fn resolve(&self, key: &str) -> Result<SlotRead, StorageError> {
        let mut state = self.lock("resolve");
        match state.slots.get(key) {
            Some(Slot::Resolved(value)) => return Ok(SlotRead::Ready(value.clone())),
            Some(Slot::Pending(handle)) => {
                let handle = handle.clone();
                drop(state);
                return Ok(SlotRead::Pending(self.pending(key, handle)));
            }
            None => {}
        }

        counter!(LOAD_TOTAL).increment(1);
        match self.inner.storage.get_item(key) {
            StorageOp::Ready(Ok(value)) => {
                state.slots.resolve(key, value.clone());
                Ok(SlotRead::Ready(value))
            }
            StorageOp::Ready(Err(error)) => {
                drop(state);
                counter!(LOAD_FAILED_TOTAL).increment(1);
                warn!(key, error = %error, "load failed");
                Err(error)
            }
            StorageOp::Pending(load) => {
                let handle = state.slots.begin_load(key, load.shared());
                drop(state);
                debug!(
                    key,
                    load_id = handle.id,
                    backend = self.inner.storage.name(),
                    "load pending"
                );
                let pending = self.pending(key, handle);
                self.drive_load(pending.clone());
                Ok(SlotRead::Pending(pending))
            }
        }
    }

    pub fn read(&self, key: &str) -> Result<SlotRead, StorageError> {
        self.resolve(key)
    }

    /// Resolve `key` and wait out a pending load.
    ///
    /// When a write lands while the load is outstanding the written value is
    /// returned, not the stale one.
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.resolve(key)? {
            SlotRead::Ready(value) => Ok(value),
            SlotRead::Pending(load) => {
                let loaded = load.wait().await?;
                match self.slot_state(key) {
                    SlotState::Resolved(current) => Ok(current),
                    _ => Ok(loaded),
                }
            }
        }
    }

    /// Set `key` to `value` (`None` removes it).
    ///
    /// The slot changes immediately and supersedes any pending load, every
    /// subscriber of `key` is called before this returns, and only then is the
    /// backend asked to persist. The backend's answer is returned; a failure
    /// does not roll back the cache.
    ///
    /// Two callers are exempt from the "called before this returns" part: a
    /// subscriber writing the key it is being told about, and a thread writing
    /// a key whose subscribers another thread is calling. Their values are
    /// delivered by the caller already delivering, right after the value in
    /// flight.
    pub fn write(&self, key: &str, value: Option<String>) -> StorageOp<()> {
        let commit = self.lock("write").commit(key, value.clone());
        counter!(WRITE_TOTAL).increment(1);
        if let Some(load_id) = commit.superseded {
            debug!(key, load_id, "write superseded pending load");
        }

        self.deliver(key);
        self.drive(self.persist(key, commit.version, value.as_deref()))
    }

    /// Remove `key` from the backend only. The cache slot and the
    /// subscribers are left alone.
    pub fn clear_key(&self, key: &str) -> StorageOp<()> {
        debug!(key, "clearing key from backend");
        self.drive(self.inner.storage.remove_item(key))
    }

    /// Observe `key`.
    ///
    /// The callback is registered first, then the slot is resolved again and
    /// a present value is delivered to this callback, so an update landing
    /// between a caller's read and its subscription is not lost. The value
    /// is queued like a write's and arrives before this returns unless
    /// another thread is delivering values of `key`. Drop the returned
    /// [`Subscription`] to stop observing.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        let callback: SubscriberCallback = Arc::new(callback);
        let (id, first) = self
            .lock("subscribe")
            .subscribers
            .insert(key, callback.clone());
        gauge!(SUBSCRIBERS).increment(1.0);

        if first {
            self.listen(key);
        }

        match self.resolve(key) {
            Ok(_) => self.catch_up(key, callback),
            Err(error) => warn!(key, error = %error, "initial read for subscriber failed"),
        }

        Subscription {
            engine: Arc::downgrade(&self.inner),
            key: key.to_string(),
            id,
            active: true,
        }
    }

    pub fn slot_state(&self, key: &str) -> SlotState {
        self.lock("slot_state").slots.state(key)
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.lock("subscriber_count").subscribers.count(key)
    }

    /// Whether a notifier listener is currently registered for `key`.
    pub fn is_listening(&self, key: &str) -> bool {
        self.lock("is_listening").subscribers.has_listener(key)
    }

    pub(crate) fn downgrade(&self) -> WeakEngine {
        WeakEngine(Arc::downgrade(&self.inner))
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().recover(SOURCE, op)
    }

    fn pending(&self, key: &str, handle: LoadHandle) -> PendingLoad {
        PendingLoad {
            key: key.to_string(),
            handle,
            engine: self.clone(),
        }
    }

    fn drive_load(&self, pending: PendingLoad) {
        if let Some(runtime) = &self.inner.runtime {
            runtime.spawn(async move {
                let _ = pending.wait().await;
            });
        }
    }

    fn finish_load(
        &self,
        key: &str,
        load_id: LoadId,
        result: &Result<Option<String>, StorageError>,
    ) {
        let mut state = self.lock("finish_load");
        if !state.slots.is_current_load(key, load_id) {
            drop(state);
            counter!(STALE_LOAD_DISCARDED_TOTAL).increment(1);
            debug!(key, load_id, "discarding stale load result");
            return;
        }

        // The loaded value came from the backend; writing it back could only
        // clobber a newer value another context stored meanwhile.
        match result {
            Ok(value) => {
                let commit = state.commit(key, value.clone());
                drop(state);
                debug!(
                    key,
                    load_id,
                    subscribers = commit.subscribers,
                    "pending load resolved"
                );
                self.deliver(key);
            }
            Err(error) => {
                state.slots.abandon_load(key, load_id);
                drop(state);
                counter!(LOAD_FAILED_TOTAL).increment(1);
                warn!(key, load_id, error = %error, "pending load failed");
            }
        }
    }

    /// Issue the backend call for version `version` of `key`, queued behind
    /// earlier writes of the key. Skipped when a newer value was committed
    /// since, as that value persists itself.
    fn persist(&self, key: &str, version: u64, value: Option<&str>) -> StorageOp<()> {
        let Some(ticket) = self.lock("persist").writes.claim(key, version) else {
            debug!(key, version, "skipping persistence of superseded value");
            return StorageOp::ready(());
        };

        let op = match value {
            Some(value) => self.inner.storage.set_item(key, value),
            None => self.inner.storage.remove_item(key),
        };
        ticket.sequence(op)
    }

    /// Start a pending backend operation on the runtime so it runs even if
    /// the caller drops the returned op.
    fn drive(&self, op: StorageOp<()>) -> StorageOp<()> {
        match (op, &self.inner.runtime) {
            (StorageOp::Pending(operation), Some(runtime)) => {
                let task = runtime.spawn(operation);
                StorageOp::pending(async move {
                    task.await
                        .unwrap_or_else(|err| Err(StorageError::task(err.to_string())))
                })
            }
            (op, _) => op,
        }
    }

    /// Run queued deliveries of `key` unless another caller already is.
    fn deliver(&self, key: &str) {
        if !self.lock("deliver").deliveries.begin(key) {
            return;
        }

        let _drain = DrainGuard { engine: self, key };
        loop {
            let next = self.lock("deliver").deliveries.next(key);
            let Some(delivery) = next else {
                break;
            };
            delivery.run();
        }
    }

    /// Hand a new subscriber the present value, queued behind any delivery
    /// already committed so it cannot overtake a newer value.
    fn catch_up(&self, key: &str, callback: SubscriberCallback) {
        {
            let mut state = self.lock("subscribe");
            if let SlotState::Resolved(Some(value)) = state.slots.state(key) {
                state.deliveries.push(key, vec![callback], Some(value));
            }
        }
        self.deliver(key);
    }

    fn listen(&self, key: &str) {
        let Some(notifier) = self.inner.notifier.clone() else {
            return;
        };

        let engine = self.downgrade();
        let owned_key = key.to_string();
        let on_change: ChangeCallback = Arc::new(move |value: Option<&str>| {
            if let Some(engine) = engine.upgrade() {
                engine.apply_external(&owned_key, value);
            }
        });

        let guard = notifier.register_key_listener(key, on_change);
        let rejected = self.lock("listen").subscribers.attach_listener(key, guard);
        drop(rejected);
    }

    fn apply_external(&self, key: &str, value: Option<&str>) {
        let commit = self
            .lock("apply_external")
            .commit(key, value.map(str::to_owned));
        debug!(
            key,
            superseded_load = ?commit.superseded,
            subscribers = commit.subscribers,
            "external change applied"
        );
        self.deliver(key);
    }

    fn unsubscribe(&self, key: &str, id: SubscriberId) {
        let listener = self.lock("unsubscribe").subscribers.remove(key, id);
        gauge!(SUBSCRIBERS).decrement(1.0);
        if listener.is_some() {
            debug!(key, "last subscriber left, releasing notifier listener");
        }
    }
}

impl fmt::Debug for PersistenceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock("debug");
        f.debug_struct("PersistenceEngine")
            .field("backend", &self.inner.storage.name())
            .field("notifier", &self.inner.notifier.is_some())
            .field("slots", &state.slots.len())
            .field("subscribers", &state.subscribers.total())
            .finish()
    }
}

/// Releases a key's delivery queue when a callback panics mid-drain.
struct DrainGuard<'a> {
    engine: &'a PersistenceEngine,
    key: &'a str,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.engine.lock("deliver").deliveries.abandon(self.key);
        }
    }
}

/// Non-owning engine handle for callbacks the engine itself stores.
#[derive(Clone)]
pub(crate) struct WeakEngine(Weak<EngineInner>);

impl WeakEngine {
    pub(crate) fn upgrade(&self) -> Option<PersistenceEngine> {
        self.0.upgrade().map(|inner| PersistenceEngine { inner })
    }
}

/// Registration returned by [`PersistenceEngine::subscribe`]; unsubscribes
/// on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    engine: Weak<EngineInner>,
    key: String,
    id: SubscriberId,
    active: bool,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(inner) = self.engine.upgrade() {
            PersistenceEngine { inner }.unsubscribe(&self.key, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
