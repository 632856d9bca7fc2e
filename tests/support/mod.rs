#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use persisted_state::storage::{MemoryStorage, StorageBackend, StorageError, StorageOp};
use tokio::sync::{Semaphore, oneshot};

type Gate = oneshot::Sender<Result<Option<String>, StorageError>>;

/// Backend whose reads stay pending until the test releases them.
///
/// Writes go straight to an inner [`MemoryStorage`] and settle immediately,
/// unless the store was built with [`GatedStorage::holding_writes`].
#[derive(Default)]
pub struct GatedStorage {
    inner: Arc<MemoryStorage>,
    gates: Mutex<HashMap<String, VecDeque<Gate>>>,
    get_calls: AtomicUsize,
    write_permits: Option<Arc<Semaphore>>,
}

impl GatedStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Writes stay pending until [`release_writes`](Self::release_writes)
    /// lets them through, oldest first.
    pub fn holding_writes() -> Arc<Self> {
        Arc::new(Self {
            write_permits: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        })
    }

    pub fn release_writes(&self, count: usize) {
        if let Some(permits) = &self.write_permits {
            permits.add_permits(count);
        }
    }

    /// Put a value in the store without going through the gates.
    pub fn seed(&self, key: &str, value: &str) {
        let _ = self.inner.set_item(key, value);
    }

    /// Settle the oldest outstanding read of `key` with `value`.
    pub fn release(&self, key: &str, value: Option<&str>) {
        self.open(key, Ok(value.map(str::to_owned)));
    }

    pub fn fail(&self, key: &str, error: StorageError) {
        self.open(key, Err(error));
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn peek(&self, key: &str) -> Option<String> {
        self.inner.peek(key)
    }

    fn open(&self, key: &str, result: Result<Option<String>, StorageError>) {
        let gate = self
            .gates
            .lock()
            .expect("gates lock")
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| panic!("no pending read for `{key}`"));
        let _ = gate.send(result);
    }
}

impl StorageBackend for GatedStorage {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn get_item(&self, key: &str) -> StorageOp<Option<String>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.gates
            .lock()
            .expect("gates lock")
            .entry(key.to_string())
            .or_default()
            .push_back(tx);

        StorageOp::pending(async move {
            rx.await
                .unwrap_or_else(|_| Err(StorageError::task("gate dropped")))
        })
    }

    fn set_item(&self, key: &str, value: &str) -> StorageOp<()> {
        let value = value.to_string();
        self.held(key, move |inner, key| inner.set_item(key, &value))
    }

    fn remove_item(&self, key: &str) -> StorageOp<()> {
        self.held(key, |inner, key| inner.remove_item(key))
    }
}

impl GatedStorage {
    fn held<F>(&self, key: &str, write: F) -> StorageOp<()>
    where
        F: FnOnce(&MemoryStorage, &str) -> StorageOp<()> + Send + 'static,
    {
        let Some(permits) = self.write_permits.clone() else {
            return write(self.inner.as_ref(), key);
        };
        let inner = self.inner.clone();
        let key = key.to_string();
        StorageOp::pending(async move {
            permits
                .acquire()
                .await
                .map_err(|_| StorageError::task("write gate closed"))?
                .forget();
            write(inner.as_ref(), &key).await
        })
    }
}

pub type Seen = Arc<Mutex<Vec<Option<String>>>>;

pub fn recorder() -> (Seen, impl Fn(Option<&str>) + Send + Sync + 'static) {
    let seen: Seen = Arc::default();
    let sink = seen.clone();
    (seen, move |value: Option<&str>| {
        sink.lock()
            .expect("recorder lock")
            .push(value.map(str::to_owned))
    })
}

pub fn values(seen: &Seen) -> Vec<Option<String>> {
    seen.lock().expect("recorder lock").clone()
}

pub fn some(value: &str) -> Option<String> {
    Some(value.to_string())
}
