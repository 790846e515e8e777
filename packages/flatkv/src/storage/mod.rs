//! Persistence layer for the flat-file store.
//!
//! - [`codec`]: snapshot encoding (`MessagePack` via `rmp-serde`)
//! - [`file_store`]: [`PersistentStore`], a [`KeyValueStore`](flatkv_core::KeyValueStore)
//!   bound to a file path with whole-snapshot `dump` / `load`

use std::io;
use std::path::PathBuf;

pub mod codec;
pub mod file_store;

pub use file_store::{LoadOutcome, PersistentStore};

/// File I/O or serialization failure during `load` / `dump`.
///
/// After one of these the in-memory snapshot and the file may disagree;
/// reads stay unreliable until the next successful load.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("store file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("encoding snapshot for {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        source: rmp_serde::encode::Error,
    },
    #[error("decoding snapshot from {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        source: rmp_serde::decode::Error,
    },
}
