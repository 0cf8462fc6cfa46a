use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::BoxError;

/// Consumer-provided flat string key-value storage.
///
/// The guard uses two instances: a durable one that survives browser
/// restarts (`localStorage`) and an ephemeral one cleared when the tab
/// closes (`sessionStorage`). Neither needs transactional guarantees; the
/// guard only does best-effort read-then-write sequences on them.
///
/// # Example
///
/// ```rust,ignore
/// impl KeyValueStore for LocalStorage {
///     fn get(&self, key: &str) -> Result<Option<String>, BoxError> {
///         Ok(self.storage.get_item(key).map_err(js_error)?)
///     }
///     // ...
/// }
/// ```
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, BoxError>;

    fn set(&self, key: &str, value: &str) -> Result<(), BoxError>;

    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), BoxError>;
}

/// In-process [`KeyValueStore`] backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every entry, as the browser does when a tab context ends.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, BoxError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BoxError> {
        self.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BoxError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// The durable and ephemeral stores the guard owns records in.
#[derive(Clone)]
pub struct Stores {
    pub durable: Arc<dyn KeyValueStore>,
    pub ephemeral: Arc<dyn KeyValueStore>,
}

impl Stores {
    #[must_use]
    pub fn new(durable: Arc<dyn KeyValueStore>, ephemeral: Arc<dyn KeyValueStore>) -> Self {
        Self { durable, ephemeral }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
