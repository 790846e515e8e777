//! [`PersistentStore`]: a key-value store bound to a single flat file.
//!
//! Every `dump` rewrites the whole file and every `load` reads the whole
//! file. The write is not atomic (no temp file + rename): a failure in the
//! middle of a dump can leave a truncated file behind, which the next load
//! reports as [`PersistenceError::Decode`].

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flatkv_core::{KeyValueStore, KvError, StoreKey, StoreValue};

use super::codec;
use super::PersistenceError;

/// Result of a [`PersistentStore::load`] that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The file was read and replaced the in-memory snapshot.
    Loaded,
    /// The file does not exist; the in-memory snapshot is untouched.
    Missing,
}

/// A [`KeyValueStore`] plus the file it is persisted to.
#[derive(Debug)]
pub struct PersistentStore<K, V> {
    path: PathBuf,
    store: KeyValueStore<K, V>,
}

impl<K: StoreKey, V: StoreValue> PersistentStore<K, V> {
    /// Binds an empty in-memory snapshot to `path`. Performs no I/O.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store: KeyValueStore::new(),
        }
    }

    /// Binds `initial` to `path` and dumps it immediately, overwriting any
    /// existing file.
    ///
    /// # Errors
    ///
    /// Returns the dump failure; no store is returned in that case.
    pub fn create(
        path: impl Into<PathBuf>,
        initial: HashMap<K, V>,
    ) -> Result<Self, PersistenceError> {
        let store = Self {
            path: path.into(),
            store: KeyValueStore::from(initial),
        };
        store.dump()?;
        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrows the in-memory snapshot.
    #[must_use]
    pub fn store(&self) -> &KeyValueStore<K, V> {
        &self.store
    }

    /// Replaces the in-memory snapshot without touching the file.
    pub fn replace(&mut self, store: KeyValueStore<K, V>) {
        self.store = store;
    }

    /// Serializes the full snapshot and overwrites the file with it.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Encode`] or [`PersistenceError::Io`].
    pub fn dump(&self) -> Result<(), PersistenceError> {
        let result = codec::encode(self.store.entries())
            .map_err(|source| PersistenceError::Encode {
                path: self.path.clone(),
                source,
            })
            .and_then(|bytes| {
                fs::write(&self.path, bytes).map_err(|source| PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                })
            });

        match &result {
            Ok(()) => tracing::debug!(
                path = %self.path.display(),
                entries = self.store.len(),
                "snapshot dumped"
            ),
            Err(err) => tracing::error!(error = %err, "failed to write snapshot"),
        }
        result
    }

    /// Reads and decodes the file without touching the in-memory snapshot.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Io`] for any other read failure and
    /// [`PersistenceError::Decode`] for a corrupt or truncated file.
    pub fn read_snapshot(&self) -> Result<Option<KeyValueStore<K, V>>, PersistenceError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                let err = PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                };
                tracing::error!(error = %err, "failed to read snapshot");
                return Err(err);
            }
        };

        let entries = codec::decode(&bytes).map_err(|source| {
            let err = PersistenceError::Decode {
                path: self.path.clone(),
                source,
            };
            tracing::error!(error = %err, "failed to decode snapshot");
            err
        })?;
        Ok(Some(KeyValueStore::from(entries)))
    }

    /// Reads the file and replaces the in-memory snapshot with it.
    ///
    /// A missing file is not an error: it yields [`LoadOutcome::Missing`]
    /// and leaves the in-memory snapshot as it was.
    ///
    /// # Errors
    ///
    /// Same as [`read_snapshot`](Self::read_snapshot); the in-memory
    /// snapshot is left untouched on error.
    pub fn load(&mut self) -> Result<LoadOutcome, PersistenceError> {
        if let Some(store) = self.read_snapshot()? {
            tracing::debug!(path = %self.path.display(), entries = store.len(), "snapshot loaded");
            self.store = store;
            Ok(LoadOutcome::Loaded)
        } else {
            tracing::warn!(path = %self.path.display(), "store file not found");
            Ok(LoadOutcome::Missing)
        }
    }

    /// Reads `key` from the in-memory snapshot only.
    pub fn get(&self, key: &K) -> Option<V> {
        self.store.get(key)
    }

    /// Writes `key` into the in-memory snapshot. Nothing reaches the file
    /// until [`dump`](Self::dump).
    pub fn set(&mut self, key: K, value: V) -> bool {
        self.store.set(key, value)
    }

    /// Removes `key` from the in-memory snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::KeyNotFound`] if the key is absent.
    pub fn delete(&mut self, key: &K) -> Result<V, KvError> {
        self.store.delete(key)
    }
}
