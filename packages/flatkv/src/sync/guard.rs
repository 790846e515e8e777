//! RAII guards over an [`AccessLock`].
//!
//! A guard owns every permit it acquired and hands each one back on drop,
//! on both the success and the error path.

use std::time::Instant;

use super::{AccessLock, LockError, Permit};

/// One held reader slot.
#[must_use = "dropping the guard releases the reader slot"]
#[derive(Debug)]
pub struct ReadGuard<'a> {
    lock: &'a dyn AccessLock,
    permit: Option<Permit>,
}

impl<'a> ReadGuard<'a> {
    /// Blocks until a reader slot is free.
    ///
    /// # Errors
    ///
    /// Propagates the backend's [`LockError`].
    pub fn acquire(lock: &'a dyn AccessLock, deadline: Option<Instant>) -> Result<Self, LockError> {
        let permit = lock.acquire_reader_slot(deadline)?;
        Ok(Self::from_permit(lock, permit))
    }

    /// Takes a reader slot only if one is free right now.
    ///
    /// # Errors
    ///
    /// Propagates the backend's [`LockError`].
    pub fn try_acquire(lock: &'a dyn AccessLock) -> Result<Option<Self>, LockError> {
        Ok(lock
            .try_acquire_reader_slot()?
            .map(|permit| Self::from_permit(lock, permit)))
    }

    fn from_permit(lock: &'a dyn AccessLock, permit: Permit) -> Self {
        Self {
            lock,
            permit: Some(permit),
        }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.lock.release_reader_slot(permit);
        }
    }
}

/// The writer token plus every reader slot.
#[must_use = "dropping the guard ends the exclusive section"]
#[derive(Debug)]
pub struct WriteGuard<'a> {
    lock: &'a dyn AccessLock,
    token: Option<Permit>,
    slots: Vec<Permit>,
}

impl<'a> WriteGuard<'a> {
    /// Takes the writer token, then claims every reader slot. Readers
    /// already inside finish first; readers arriving while the writer
    /// waits queue behind it.
    ///
    /// # Errors
    ///
    /// Propagates the backend's [`LockError`]. Everything acquired before
    /// the failure is released before returning.
    pub fn acquire(lock: &'a dyn AccessLock, deadline: Option<Instant>) -> Result<Self, LockError> {
        let token = lock.acquire_writer_token(deadline)?;
        let mut guard = Self {
            lock,
            token: Some(token),
            slots: Vec::new(),
        };

        match lock.claim_all_reader_slots(deadline) {
            Ok(slots) => {
                guard.slots = slots;
                Ok(guard)
            }
            Err(err) => {
                tracing::warn!(
                    max_readers = lock.max_readers(),
                    error = %err,
                    "writer gave up; releasing the writer token"
                );
                Err(err)
            }
        }
    }

    /// Reader slots currently held by this writer.
    #[must_use]
    pub fn claimed_slots(&self) -> usize {
        self.slots.len()
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        for permit in self.slots.drain(..) {
            self.lock.release_reader_slot(permit);
        }
        if let Some(token) = self.token.take() {
            self.lock.release_writer_token(token);
        }
    }
}
