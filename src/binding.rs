//! Reactive handle over a single key.
//!
//! [`PersistedState`] is what a UI component would hold: it subscribes on
//! construction, tracks the latest value pushed by the engine and
//! unsubscribes when dropped. While the first load is in flight it reports
//! the default together with `pending = true`.

use std::sync::{Arc, Mutex};

use crate::cache::lock::Recover;
use crate::cache::{PersistenceEngine, SlotRead, Subscription};
use crate::storage::{StorageError, StorageOp};

const SOURCE: &str = "binding";

/// Snapshot of a [`PersistedState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateView {
    pub value: String,
    pub pending: bool,
}

enum Observed {
    Pending,
    Value(Option<String>),
}

pub struct PersistedState {
    engine: PersistenceEngine,
    key: String,
    default: String,
    observed: Arc<Mutex<Observed>>,
    _subscription: Subscription,
}

impl PersistedState {
    /// Bind to `key`. Errors only when the backend fails synchronously on the
    /// first read.
    pub fn new(
        engine: &PersistenceEngine,
        key: impl Into<String>,
        default: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let key = key.into();
        let initial = match engine.resolve(&key)? {
            SlotRead::Ready(value) => Observed::Value(value),
            SlotRead::Pending(_) => Observed::Pending,
        };

        let observed = Arc::new(Mutex::new(initial));
        let sink = observed.clone();
        let subscription = engine.subscribe(&key, move |value| {
            let mut current = sink.lock().recover(SOURCE, "update");
            *current = Observed::Value(value.map(str::to_owned));
        });

        // A load that settled to absence between the first read and the
        // subscription is not delivered to the callback.
        if let SlotRead::Ready(value) = engine.resolve(&key)? {
            let mut current = observed.lock().recover(SOURCE, "catch_up");
            if matches!(*current, Observed::Pending) {
                *current = Observed::Value(value);
            }
        }

        Ok(Self {
            engine: engine.clone(),
            key,
            default: default.into(),
            observed,
            _subscription: subscription,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current value; the default stands in for absent or empty values and
    /// while the first load is pending.
    pub fn get(&self) -> StateView {
        match &*self.observed.lock().recover(SOURCE, "get") {
            Observed::Pending => StateView {
                value: self.default.clone(),
                pending: true,
            },
            Observed::Value(value) => StateView {
                value: value
                    .as_deref()
                    .filter(|value| !value.is_empty())
                    .unwrap_or(&self.default)
                    .to_string(),
                pending: false,
            },
        }
    }

    pub fn value(&self) -> String {
        self.get().value
    }

    pub fn is_pending(&self) -> bool {
        self.get().pending
    }

    pub fn set(&self, value: impl Into<String>) -> StorageOp<()> {
        self.engine.write(&self.key, Some(value.into()))
    }

    pub fn clear(&self) -> StorageOp<()> {
        self.engine.write(&self.key, None)
    }

    /// Wait for the first load to settle, then return the view.
    pub async fn settled(&self) -> Result<StateView, StorageError> {
        if self.is_pending() {
            self.engine.get_raw(&self.key).await?;
        }
        Ok(self.get())
    }
}

impl std::fmt::Debug for PersistedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedState")
            .field("key", &self.key)
            .field("view", &self.get())
            .finish()
    }
}
