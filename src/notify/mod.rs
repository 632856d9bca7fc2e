//! Change notification between execution contexts.
//!
//! A [`ChangeNotifier`] tells an engine that a key was written somewhere else
//! (another engine sharing the same device store). The engine registers one
//! listener per observed key and drops the returned [`ListenerGuard`] when the
//! key has no local subscribers left.

mod hub;

use std::fmt;
use std::sync::Arc;

pub use hub::{BroadcastStorage, ChangeHub, HubEndpoint};

/// Receives the raw new value of a key, `None` when it was removed.
pub type ChangeCallback = Arc<dyn Fn(Option<&str>) + Send + Sync>;

pub trait ChangeNotifier: Send + Sync {
    fn register_key_listener(&self, key: &str, on_change: ChangeCallback) -> ListenerGuard;
}

/// Disposer for a notifier registration. Runs on drop.
#[must_use = "dropping a ListenerGuard unregisters the listener"]
pub struct ListenerGuard {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerGuard {
    pub fn new(dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// A guard with nothing to tear down.
    pub fn noop() -> Self {
        Self { dispose: None }
    }

    pub fn dispose(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("armed", &self.dispose.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn guard_disposes_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let guard = ListenerGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        guard.dispose();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guard_disposes_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        {
            let _guard = ListenerGuard::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
