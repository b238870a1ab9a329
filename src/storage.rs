use std::collections::HashMap;
use std::sync::RwLock;

use enum_dispatch::enum_dispatch;

/// Process-local key/value store. Redis keys remain the only state shared
/// across replicas; this holds per-process bookkeeping only.
#[enum_dispatch]
pub enum Store {
    MemoryStore,
}

#[enum_dispatch(Store)]
pub trait Storing {
    fn set(&self, key: &str, value: String);
    fn get(&self, key: &str) -> Option<String>;
    fn delete(&self, key: &str);
    fn exists(&self, key: &str) -> bool;
}

/// In-memory backend. Reads proceed in parallel, writes are exclusive.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, String>>,
}

impl Storing for MemoryStore {
    fn set(&self, key: &str, value: String) {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn delete(&self, key: &str) {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }

    fn exists(&self, key: &str) -> bool {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(key)
    }
}
