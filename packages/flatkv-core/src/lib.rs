//! `flatkv` core: the runtime value type and the in-memory key-value store
//! that the persistence and synchronization layers build on.

pub mod kv;
pub mod types;

pub use kv::{KeyValueStore, KvError, StoreKey, StoreValue};
pub use types::Value;
