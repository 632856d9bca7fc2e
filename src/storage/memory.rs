use std::collections::HashMap;
use std::sync::RwLock;

use crate::cache::lock::Recover;

use super::{StorageBackend, StorageOp};

const SOURCE: &str = "storage::memory";

/// Synchronous in-process key-value store.
///
/// Same semantics as the device store, minus durability. Every call settles
/// immediately.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value directly, bypassing the `StorageOp` wrapper.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.read().recover(SOURCE, "peek").get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().recover(SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().recover(SOURCE, "clear").clear();
    }
}

impl StorageBackend for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get_item(&self, key: &str) -> StorageOp<Option<String>> {
        StorageOp::ready(self.peek(key))
    }

    fn set_item(&self, key: &str, value: &str) -> StorageOp<()> {
        self.entries
            .write()
            .recover(SOURCE, "set_item")
            .insert(key.to_string(), value.to_string());
        StorageOp::ready(())
    }

    fn remove_item(&self, key: &str) -> StorageOp<()> {
        self.entries.write().recover(SOURCE, "remove_item").remove(key);
        StorageOp::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_reads_as_absent() {
        let storage = MemoryStorage::new();
        let read = storage.get_item("missing").now().expect("memory reads settle");
        assert_eq!(read, Ok(None));
    }

    #[test]
    fn set_then_remove() {
        let storage = MemoryStorage::new();

        assert!(!storage.set_item("theme", "dark").is_pending());
        assert_eq!(storage.peek("theme").as_deref(), Some("dark"));
        assert_eq!(storage.len(), 1);

        storage.remove_item("theme");
        assert!(storage.peek("theme").is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn removing_missing_key_is_ok() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.remove_item("nope").now(), Some(Ok(())));
    }

    #[test]
    fn clear_drops_everything() {
        let storage = MemoryStorage::new();
        storage.set_item("a", "1");
        storage.set_item("b", "2");

        storage.clear();
        assert!(storage.is_empty());
    }
}
