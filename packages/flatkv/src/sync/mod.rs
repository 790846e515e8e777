//! Reader/writer exclusion shared by every accessor of one store file.
//!
//! The scheme is the same for both backends: a pool of `max_readers` slots
//! that each reader holds one of, plus a single writer token. A writer
//! takes the token and then claims every slot, so while it is active no
//! reader can be inside and no other writer can start.
//!
//! - [`thread_lock::ThreadLock`]: in-process, built on [`semaphore::FairSemaphore`]
//! - [`process_lock::ProcessLock`]: cross-process, built on advisory file locks
//! - [`guard`]: RAII guards that release everything they acquired on drop

use std::fmt::Debug;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

pub mod guard;
pub mod process_lock;
pub mod semaphore;
pub mod thread_lock;

pub use guard::{ReadGuard, WriteGuard};
pub use process_lock::ProcessLock;
pub use semaphore::FairSemaphore;
pub use thread_lock::ThreadLock;

/// Failure to obtain or manage a lock primitive.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("timed out waiting for {what}")]
    Timeout { what: &'static str },
    #[error("lock file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Proof of one held reader slot or of the writer token.
///
/// Only the backend that issued a permit knows how to give it back; hand it
/// to the matching `release_*` method. Dropping a permit without releasing
/// it leaks the slot for the in-process backend. For the cross-process
/// backend the underlying file lock is released when the handle closes.
#[must_use = "a permit must be handed back to the lock that issued it"]
#[derive(Debug)]
pub struct Permit {
    slot: Option<usize>,
    handle: Option<File>,
}

impl Permit {
    pub(crate) fn counted() -> Self {
        Self {
            slot: None,
            handle: None,
        }
    }

    pub(crate) fn file(slot: Option<usize>, handle: File) -> Self {
        Self {
            slot,
            handle: Some(handle),
        }
    }

    /// Index of the reader slot file this permit holds, if any.
    #[must_use]
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub(crate) fn into_handle(self) -> Option<File> {
        self.handle
    }
}

/// The lock primitives an accessor needs, independent of whether the
/// participants are threads or processes.
///
/// `deadline` of `None` blocks indefinitely.
pub trait AccessLock: Send + Sync + Debug {
    /// Number of reader slots. Writers claim all of them.
    fn max_readers(&self) -> usize;

    /// Blocks until any reader slot is free and takes it.
    ///
    /// # Errors
    ///
    /// [`LockError::Timeout`] if `deadline` passes first, [`LockError::Io`]
    /// if the backend's primitives fail.
    fn acquire_reader_slot(&self, deadline: Option<Instant>) -> Result<Permit, LockError>;

    /// Takes a free reader slot if one is available right now.
    ///
    /// # Errors
    ///
    /// [`LockError::Io`] if the backend's primitives fail.
    fn try_acquire_reader_slot(&self) -> Result<Option<Permit>, LockError>;

    /// Blocks until reader slot `index` is free and takes it. Used by a
    /// writer that already holds the writer token to fill the pool.
    ///
    /// Backends that do not distinguish slots may ignore `index`.
    ///
    /// # Errors
    ///
    /// Same as [`acquire_reader_slot`](Self::acquire_reader_slot).
    fn claim_reader_slot(&self, index: usize, deadline: Option<Instant>)
        -> Result<Permit, LockError>;

    /// Claims every reader slot for a writer that holds the writer token.
    ///
    /// The default claims slots `0..max_readers` in index order through
    /// [`claim_reader_slot`](Self::claim_reader_slot). Backends whose slot
    /// queue is shared with readers override it so that the writer keeps
    /// its place in line while it waits.
    ///
    /// # Errors
    ///
    /// Same as [`acquire_reader_slot`](Self::acquire_reader_slot). Slots
    /// claimed before the failure are released before returning.
    fn claim_all_reader_slots(&self, deadline: Option<Instant>) -> Result<Vec<Permit>, LockError> {
        let max_readers = self.max_readers();
        let mut claimed = Vec::with_capacity(max_readers);
        for index in 0..max_readers {
            match self.claim_reader_slot(index, deadline) {
                Ok(permit) => claimed.push(permit),
                Err(err) => {
                    tracing::debug!(claimed = claimed.len(), max_readers, "releasing partial claim");
                    for permit in claimed {
                        self.release_reader_slot(permit);
                    }
                    return Err(err);
                }
            }
        }
        Ok(claimed)
    }

    /// Hands back a slot taken by any of the reader slot methods.
    fn release_reader_slot(&self, permit: Permit);

    /// Blocks until the writer token is free and takes it.
    ///
    /// # Errors
    ///
    /// Same as [`acquire_reader_slot`](Self::acquire_reader_slot).
    fn acquire_writer_token(&self, deadline: Option<Instant>) -> Result<Permit, LockError>;

    /// Hands back the writer token.
    fn release_writer_token(&self, permit: Permit);
}
