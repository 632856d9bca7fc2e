//! Cache slots: the per-key source of truth.
//!
//! A key with no entry is `Unloaded`. An entry is either a pending load,
//! tagged with its [`LoadId`], or a resolved value where `None` means the key
//! is absent from storage.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::{BoxFuture, Shared};

use crate::storage::StorageError;

/// Generation number of a load. Strictly increasing per engine.
pub type LoadId = u64;

pub(crate) type SharedLoad = Shared<BoxFuture<'static, Result<Option<String>, StorageError>>>;

/// One in-flight `get_item`. Clones share the settled flag so the outcome is
/// applied once no matter how many readers await it.
#[derive(Clone)]
pub(crate) struct LoadHandle {
    pub(crate) id: LoadId,
    pub(crate) load: SharedLoad,
    settled: Arc<AtomicBool>,
}

impl LoadHandle {
    fn new(id: LoadId, load: SharedLoad) -> Self {
        Self {
            id,
            load,
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True for the first caller only.
    pub(crate) fn settle(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }
}

pub(crate) enum Slot {
    Pending(LoadHandle),
    Resolved(Option<String>),
}

/// Observable state of a key's slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Unloaded,
    Pending(LoadId),
    Resolved(Option<String>),
}

#[derive(Default)]
pub(crate) struct SlotStore {
    slots: HashMap<String, Slot>,
    last_load: LoadId,
}

impl SlotStore {
    pub(crate) fn get(&self, key: &str) -> Option<&Slot> {
        self.slots.get(key)
    }

    /// Mark `key` as loading and return the handle identifying this load.
    pub(crate) fn begin_load(&mut self, key: &str, load: SharedLoad) -> LoadHandle {
        self.last_load += 1;
        let handle = LoadHandle::new(self.last_load, load);
        self.slots
            .insert(key.to_string(), Slot::Pending(handle.clone()));
        handle
    }

    /// Store a resolved value. Returns the id of the load this superseded.
    pub(crate) fn resolve(&mut self, key: &str, value: Option<String>) -> Option<LoadId> {
        match self.slots.insert(key.to_string(), Slot::Resolved(value)) {
            Some(Slot::Pending(handle)) => Some(handle.id),
            _ => None,
        }
    }

    pub(crate) fn is_current_load(&self, key: &str, id: LoadId) -> bool {
        matches!(self.slots.get(key), Some(Slot::Pending(handle)) if handle.id == id)
    }

    /// Return `key` to `Unloaded` if `id` is still its current load.
    pub(crate) fn abandon_load(&mut self, key: &str, id: LoadId) -> bool {
        if self.is_current_load(key, id) {
            self.slots.remove(key);
            true
        } else {
            false
        }
    }

    pub(crate) fn state(&self, key: &str) -> SlotState {
        match self.slots.get(key) {
            None => SlotState::Unloaded,
            Some(Slot::Pending(handle)) => SlotState::Pending(handle.id),
            Some(Slot::Resolved(value)) => SlotState::Resolved(value.clone()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
