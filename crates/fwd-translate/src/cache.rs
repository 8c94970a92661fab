//! Per-transaction scratch storage for customizers.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Entry = Arc<dyn Any + Send + Sync>;

/// Typed key-value store scoped to one read or write transaction.
///
/// Customizers use it to pass data between invocations of the same
/// transaction, e.g. an index allocated by a parent create that a child
/// create needs. Values are shared as `Arc<T>`; a lookup with the wrong type
/// behaves like a miss.
#[derive(Default)]
pub struct ModificationCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl ModificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.lock().insert(key.into(), Arc::new(value));
    }

    /// Returns the value under `key` if it has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let entry = self.lock().get(key).cloned()?;
        entry.downcast::<T>().ok()
    }

    /// Returns the value under `key`, inserting the result of `init` first if
    /// the key is absent or holds another type.
    pub fn get_or_insert_with<T, F>(&self, key: &str, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(key).cloned() {
            if let Ok(value) = existing.downcast::<T>() {
                return value;
            }
        }
        let value = Arc::new(init());
        entries.insert(key.to_string(), value.clone());
        value
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Removes `key`, returning true if it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for ModificationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        f.debug_struct("ModificationCache").field("keys", &keys).finish()
    }
}
