//! [`SyncAccessor`]: the entry point for concurrent access to one store
//! file.
//!
//! Every operation runs the full cycle against the file, which is the only
//! source of truth:
//!
//! - `get` / `snapshot`: hold one reader slot, read the file into a private
//!   copy, answer from it
//! - `set` / `delete`: hold the writer token and every reader slot, reload,
//!   mutate, dump
//!
//! The in-memory snapshot tracks the last content read or written and only
//! answers reads when the file is missing or unreadable.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flatkv_core::{KeyValueStore, StoreKey, StoreValue};
use parking_lot::RwLock;
use tracing::info_span;

use crate::config::AccessorConfig;
use crate::error::AccessError;
use crate::storage::PersistentStore;
use crate::sync::{AccessLock, LockError, ReadGuard, WriteGuard};

#[derive(Debug)]
pub struct SyncAccessor<K, V> {
    store: RwLock<PersistentStore<K, V>>,
    lock: Arc<dyn AccessLock>,
    lock_timeout: Option<Duration>,
}

impl<K: StoreKey, V: StoreValue> SyncAccessor<K, V> {
    /// Attaches to the store file named by `config` without touching it.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Config`] or [`AccessError::Lock`] if the lock
    /// backend cannot be built.
    pub fn open(config: &AccessorConfig) -> Result<Self, AccessError> {
        let lock = config.build_lock()?;
        Ok(Self::with_lock(config, lock))
    }

    /// Like [`open`](Self::open), then writes `initial` as the new content
    /// of the store file under writer exclusion.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), plus [`AccessError::Persistence`] if
    /// the initial dump fails.
    pub fn create(config: &AccessorConfig, initial: HashMap<K, V>) -> Result<Self, AccessError> {
        let lock = config.build_lock()?;
        Self::create_with_lock(config, lock, initial)
    }

    /// Attaches using an existing lock, typically one shared with other
    /// accessors of the same file. Only `path` and `lock_timeout` are
    /// taken from `config`.
    #[must_use]
    pub fn with_lock(config: &AccessorConfig, lock: Arc<dyn AccessLock>) -> Self {
        Self {
            store: RwLock::new(PersistentStore::open(config.path.clone())),
            lock,
            lock_timeout: config.lock_timeout,
        }
    }

    /// [`create`](Self::create) with an existing lock.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Lock`] if writer exclusion cannot be obtained
    /// and [`AccessError::Persistence`] if the dump fails.
    pub fn create_with_lock(
        config: &AccessorConfig,
        lock: Arc<dyn AccessLock>,
        initial: HashMap<K, V>,
    ) -> Result<Self, AccessError> {
        let accessor = Self::with_lock(config, lock);
        {
            let _exclusive = WriteGuard::acquire(accessor.lock.as_ref(), accessor.deadline())?;
            let mut store = accessor.store.write();
            store.replace(KeyValueStore::from(initial));
            store.dump()?;
            tracing::info!(
                path = %store.path().display(),
                entries = store.store().len(),
                "store created"
            );
        }
        Ok(accessor)
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.store.read().path().to_path_buf()
    }

    #[must_use]
    pub fn max_readers(&self) -> usize {
        self.lock.max_readers()
    }

    /// The lock this accessor coordinates through, for handing to another
    /// accessor of the same file.
    #[must_use]
    pub fn shared_lock(&self) -> Arc<dyn AccessLock> {
        Arc::clone(&self.lock)
    }

    /// Reads `key` from the current file content.
    ///
    /// A missing key is reported as `Ok(None)` and logged, never as an
    /// error.
    ///
    /// # Errors
    ///
    /// Only [`AccessError::Lock`]: a lock timeout or lock file failure.
    pub fn get(&self, key: &K) -> Result<Option<V>, AccessError> {
        self.instrumented("get", key, || {
            let _slot = self.read_guard()?;
            let value = self.with_snapshot(|store| store.get(key));
            let outcome = if value.is_some() { "ok" } else { "absent" };
            Ok((value, outcome))
        })
    }

    /// Writes `key` and persists the whole store.
    ///
    /// Returns `Ok(false)` if the value was applied but could not be
    /// written to the file; the failure is logged.
    ///
    /// # Errors
    ///
    /// Only [`AccessError::Lock`].
    pub fn set(&self, key: K, value: V) -> Result<bool, AccessError> {
        let span_key = key.clone();
        self.instrumented("set", &span_key, || {
            let ((), persisted) = self.write(|store| {
                store.set(key, value);
                Ok(())
            })?;
            Ok((persisted, if persisted { "ok" } else { "not_persisted" }))
        })
    }

    /// Removes `key` and persists the whole store, returning the removed
    /// value. Nothing is written if the key was absent.
    ///
    /// A failed dump is logged; the removed value is still returned.
    ///
    /// # Errors
    ///
    /// [`AccessError::KeyNotFound`] if the key is absent, or
    /// [`AccessError::Lock`].
    pub fn delete(&self, key: &K) -> Result<V, AccessError> {
        self.instrumented("delete", key, || {
            let (value, persisted) = self.write(|store| Ok(store.delete(key)?))?;
            Ok((value, if persisted { "ok" } else { "not_persisted" }))
        })
    }

    /// Every entry of the current file content, read under one reader
    /// slot.
    ///
    /// # Errors
    ///
    /// Only [`AccessError::Lock`].
    pub fn snapshot(&self) -> Result<HashMap<K, V>, AccessError> {
        self.instrumented("snapshot", &"*", || {
            let _slot = self.read_guard()?;
            Ok((self.with_snapshot(|store| store.entries().clone()), "ok"))
        })
    }

    /// Number of entries in the current file content.
    ///
    /// # Errors
    ///
    /// Only [`AccessError::Lock`].
    pub fn len(&self) -> Result<usize, AccessError> {
        let _slot = self.read_guard()?;
        Ok(self.with_snapshot(KeyValueStore::len))
    }

    /// # Errors
    ///
    /// Only [`AccessError::Lock`].
    pub fn is_empty(&self) -> Result<bool, AccessError> {
        Ok(self.len()? == 0)
    }

    /// Whether every reader slot is held right now.
    ///
    /// Takes a slot if one is free and gives it straight back; has no other
    /// effect.
    ///
    /// # Errors
    ///
    /// Only [`AccessError::Lock`] for lock file failures.
    pub fn is_reader_capacity_exhausted(&self) -> Result<bool, AccessError> {
        let exhausted = ReadGuard::try_acquire(self.lock.as_ref())?.is_none();
        if exhausted {
            tracing::info!(max_readers = self.lock.max_readers(), "reader capacity exhausted");
        }
        Ok(exhausted)
    }

    fn deadline(&self) -> Option<Instant> {
        self.lock_timeout.map(|timeout| Instant::now() + timeout)
    }

    /// Takes a reader slot, logging when the caller has to wait for one.
    fn read_guard(&self) -> Result<ReadGuard<'_>, LockError> {
        if let Some(guard) = ReadGuard::try_acquire(self.lock.as_ref())? {
            return Ok(guard);
        }
        tracing::info!(
            max_readers = self.lock.max_readers(),
            "reader capacity exhausted; waiting for a slot"
        );
        ReadGuard::acquire(self.lock.as_ref(), self.deadline())
    }

    /// Runs `read` against a fresh copy of the file, or the cached snapshot
    /// if the file is missing or unreadable. Caller holds a reader slot.
    ///
    /// A fresh copy replaces the cache unless another thread of this
    /// accessor is using it. No writer can run while the slot is held, so
    /// every reader sees the same content.
    fn with_snapshot<R>(&self, read: impl FnOnce(&KeyValueStore<K, V>) -> R) -> R {
        let fresh = self.store.read().read_snapshot();
        match fresh {
            Ok(Some(fresh)) => {
                let result = read(&fresh);
                if let Some(mut cache) = self.store.try_write() {
                    cache.replace(fresh);
                }
                result
            }
            Ok(None) => {
                let cache = self.store.read();
                tracing::debug!(path = %cache.path().display(), "store file missing; serving cache");
                read(cache.store())
            }
            Err(err) => {
                tracing::warn!(error = %err, "store file unreadable; serving cache");
                read(self.store.read().store())
            }
        }
    }

    /// Reload, mutate, dump under full writer exclusion. Returns the
    /// mutation's result and whether the dump succeeded. A failed mutation
    /// skips the dump.
    fn write<T>(
        &self,
        mutate: impl FnOnce(&mut PersistentStore<K, V>) -> Result<T, AccessError>,
    ) -> Result<(T, bool), AccessError> {
        let _exclusive = WriteGuard::acquire(self.lock.as_ref(), self.deadline())?;
        let mut store = self.store.write();
        if let Err(err) = store.load() {
            tracing::warn!(error = %err, "reload failed; applying to cached snapshot");
        }
        let result = mutate(&mut store)?;
        let persisted = store.dump().is_ok();
        Ok((result, persisted))
    }

    /// Wraps one operation in an `access` span and emits its completion
    /// event. `body` returns its value together with the outcome label.
    fn instrumented<T>(
        &self,
        op: &'static str,
        key: &dyn Debug,
        body: impl FnOnce() -> Result<(T, &'static str), AccessError>,
    ) -> Result<T, AccessError> {
        let span = info_span!(
            "access",
            op,
            key = ?key,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let _entered = span.enter();

        let start = Instant::now();
        let result = body();
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match &result {
            Ok((_, outcome)) => *outcome,
            Err(err) => err.outcome(),
        };
        span.record("duration_ms", duration_ms);
        span.record("outcome", outcome);

        match &result {
            Ok(_) => tracing::info!(op, duration_ms, outcome, "operation complete"),
            Err(err) => tracing::warn!(op, duration_ms, outcome, error = %err, "operation failed"),
        }
        result.map(|(value, _)| value)
    }
}
