//! In-memory key-value store, the leaf of the storage stack.
//!
//! [`KeyValueStore`] is a plain associative mapping with no concurrency
//! guarantees of its own. Callers that share it across threads or
//! processes are expected to provide exclusion (see the `flatkv` crate's
//! accessor).

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Bounds every key type must satisfy to be stored and persisted.
pub trait StoreKey:
    Eq + Hash + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> StoreKey for T where
    T: Eq + Hash + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Bounds every value type must satisfy to be stored and persisted.
pub trait StoreValue: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> StoreValue for T where
    T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Errors raised by [`KeyValueStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    #[error("key {key} not found")]
    KeyNotFound { key: String },
}

/// Plain associative mapping with defined behavior on missing keys.
///
/// A miss on [`get`](Self::get) is logged and reported as `None`; a miss on
/// [`delete`](Self::delete) is returned to the caller as
/// [`KvError::KeyNotFound`].
#[derive(Debug, Clone)]
pub struct KeyValueStore<K, V> {
    entries: HashMap<K, V>,
}

impl<K: StoreKey, V: StoreValue> KeyValueStore<K, V> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Returns a copy of the value stored under `key`, or `None`.
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(value) = self.entries.get(key) {
            Some(value.clone())
        } else {
            tracing::info!(key = ?key, "key not found");
            None
        }
    }

    /// Inserts or overwrites the entry for `key`. Always returns `true`.
    pub fn set(&mut self, key: K, value: V) -> bool {
        tracing::debug!(key = ?key, value = ?value, "value set");
        self.entries.insert(key, value);
        true
    }

    /// Removes `key` and returns its value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::KeyNotFound`] if the key is absent.
    pub fn delete(&mut self, key: &K) -> Result<V, KvError> {
        match self.entries.remove(key) {
            Some(value) => {
                tracing::debug!(key = ?key, value = ?value, "key deleted");
                Ok(value)
            }
            None => {
                tracing::warn!(key = ?key, "delete of missing key");
                Err(KvError::KeyNotFound {
                    key: format!("{key:?}"),
                })
            }
        }
    }

    /// Whether `key` has an entry. Unlike [`get`](Self::get), a miss is
    /// not logged.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrows the full snapshot.
    #[must_use]
    pub fn entries(&self) -> &HashMap<K, V> {
        &self.entries
    }

    /// Consumes the store, returning the full snapshot.
    #[must_use]
    pub fn into_entries(self) -> HashMap<K, V> {
        self.entries
    }
}

impl<K: StoreKey, V: StoreValue> Default for KeyValueStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StoreKey, V: StoreValue + PartialEq> PartialEq for KeyValueStore<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: StoreKey, V: StoreValue> From<HashMap<K, V>> for KeyValueStore<K, V> {
    fn from(entries: HashMap<K, V>) -> Self {
        Self { entries }
    }
}
