//! `flatkv`: a flat-file key-value store shared by concurrent threads or
//! processes, with bounded concurrent readers and exclusive writers.

pub mod accessor;
pub mod config;
pub mod error;
pub mod storage;
pub mod sync;
pub mod telemetry;
pub mod workload;

pub use accessor::SyncAccessor;
pub use config::{AccessorConfig, ConfigError, LockMode};
pub use error::AccessError;
pub use storage::{LoadOutcome, PersistenceError, PersistentStore};
pub use sync::{AccessLock, LockError, ProcessLock, ReadGuard, ThreadLock, WriteGuard};
