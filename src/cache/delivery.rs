//! Per-key delivery of committed values to subscribers.
//!
//! Values are queued under the engine lock in commit order. Whoever finds a
//! key idle drains its queue outside the lock; values committed meanwhile by
//! other threads, or by a callback writing the key it is being told about,
//! are queued behind and delivered by that same drainer. Every subscriber of
//! a key therefore sees its values in commit order and ends on the latest.

use std::collections::{HashMap, VecDeque};

use super::registry::SubscriberCallback;

pub(crate) struct Delivery {
    callbacks: Vec<SubscriberCallback>,
    value: Option<String>,
}

impl Delivery {
    pub(crate) fn run(&self) {
        for callback in &self.callbacks {
            callback(self.value.as_deref());
        }
    }
}

#[derive(Default)]
struct KeyDeliveries {
    draining: bool,
    queued: VecDeque<Delivery>,
}

#[derive(Default)]
pub(crate) struct DeliveryQueues {
    keys: HashMap<String, KeyDeliveries>,
}

impl DeliveryQueues {
    pub(crate) fn push(
        &mut self,
        key: &str,
        callbacks: Vec<SubscriberCallback>,
        value: Option<String>,
    ) {
        if callbacks.is_empty() {
            return;
        }
        self.keys
            .entry(key.to_string())
            .or_default()
            .queued
            .push_back(Delivery { callbacks, value });
    }

    /// Take over draining `key`. False when nothing is queued or another
    /// caller is already draining it.
    pub(crate) fn begin(&mut self, key: &str) -> bool {
        match self.keys.get_mut(key) {
            Some(entry) if !entry.draining && !entry.queued.is_empty() => {
                entry.draining = true;
                true
            }
            _ => false,
        }
    }

    /// Next delivery for the current drainer; `None` ends the drain.
    pub(crate) fn next(&mut self, key: &str) -> Option<Delivery> {
        let entry = self.keys.get_mut(key)?;
        let next = entry.queued.pop_front();
        if next.is_none() {
            self.keys.remove(key);
        }
        next
    }

    /// Forget everything queued for `key` after its drainer panicked.
    pub(crate) fn abandon(&mut self, key: &str) {
        self.keys.remove(key);
    }
}
