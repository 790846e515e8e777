//! Errors surfaced by [`SyncAccessor`](crate::SyncAccessor).

use flatkv_core::KvError;

use crate::config::ConfigError;
use crate::storage::PersistenceError;
use crate::sync::LockError;

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// `delete` of a key that is not in the store.
    #[error("key {key} not found")]
    KeyNotFound { key: String },
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<KvError> for AccessError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::KeyNotFound { key } => Self::KeyNotFound { key },
        }
    }
}

impl AccessError {
    /// Short label used as the `outcome` field of access events.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::KeyNotFound { .. } => "key_not_found",
            Self::Lock(LockError::Timeout { .. }) => "timeout",
            Self::Lock(LockError::Io { .. }) => "lock_error",
            Self::Config(_) => "invalid_config",
            Self::Persistence(_) => "persistence_error",
        }
    }
}
