//! In-process backend: every participant is a thread sharing one value.

use std::time::Instant;

use super::{AccessLock, FairSemaphore, LockError, Permit};
use crate::config::ConfigError;

/// Reader slots and writer token as two [`FairSemaphore`]s.
#[derive(Debug)]
pub struct ThreadLock {
    slots: FairSemaphore,
    writer: FairSemaphore,
}

impl ThreadLock {
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroReaders`] if `max_readers` is zero.
    pub fn new(max_readers: usize) -> Result<Self, ConfigError> {
        if max_readers == 0 {
            return Err(ConfigError::ZeroReaders);
        }
        Ok(Self {
            slots: FairSemaphore::new(max_readers),
            writer: FairSemaphore::new(1),
        })
    }

    /// Reader slots not currently held by a reader or writer.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.slots.available()
    }

    /// Readers and writers queued for reader slots.
    #[must_use]
    pub fn waiting_for_slots(&self) -> usize {
        self.slots.queued()
    }
}

impl AccessLock for ThreadLock {
    fn max_readers(&self) -> usize {
        self.slots.capacity()
    }

    fn acquire_reader_slot(&self, deadline: Option<Instant>) -> Result<Permit, LockError> {
        if self.slots.acquire(deadline) {
            Ok(Permit::counted())
        } else {
            Err(LockError::Timeout {
                what: "a reader slot",
            })
        }
    }

    fn try_acquire_reader_slot(&self) -> Result<Option<Permit>, LockError> {
        Ok(self.slots.try_acquire().then(Permit::counted))
    }

    fn claim_reader_slot(
        &self,
        _index: usize,
        deadline: Option<Instant>,
    ) -> Result<Permit, LockError> {
        self.acquire_reader_slot(deadline)
    }

    fn claim_all_reader_slots(&self, deadline: Option<Instant>) -> Result<Vec<Permit>, LockError> {
        let max_readers = self.slots.capacity();
        if self.slots.acquire_many(max_readers, deadline) {
            Ok((0..max_readers).map(|_| Permit::counted()).collect())
        } else {
            Err(LockError::Timeout {
                what: "every reader slot",
            })
        }
    }

    fn release_reader_slot(&self, _permit: Permit) {
        self.slots.release();
    }

    fn acquire_writer_token(&self, deadline: Option<Instant>) -> Result<Permit, LockError> {
        if self.writer.acquire(deadline) {
            Ok(Permit::counted())
        } else {
            Err(LockError::Timeout {
                what: "the writer token",
            })
        }
    }

    fn release_writer_token(&self, _permit: Permit) {
        self.writer.release();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn zero_readers_is_rejected() {
        assert_eq!(ThreadLock::new(0).unwrap_err(), ConfigError::ZeroReaders);
    }

    #[test]
    fn reader_slots_are_bounded() {
        let lock = ThreadLock::new(2).unwrap();
        let a = lock.try_acquire_reader_slot().unwrap().unwrap();
        let b = lock.try_acquire_reader_slot().unwrap().unwrap();
        assert!(lock.try_acquire_reader_slot().unwrap().is_none());

        let err = lock
            .acquire_reader_slot(Some(Instant::now() + Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));

        lock.release_reader_slot(a);
        assert_eq!(lock.free_slots(), 1);
        lock.release_reader_slot(b);
        assert_eq!(lock.free_slots(), 2);
    }

    #[test]
    fn claim_all_takes_every_slot_or_none() {
        let lock = ThreadLock::new(3).unwrap();
        let reader = lock.try_acquire_reader_slot().unwrap().unwrap();

        let err = lock
            .claim_all_reader_slots(Some(Instant::now() + Duration::from_millis(20)))
            .unwrap_err();
        assert_eq!(err.to_string(), "timed out waiting for every reader slot");
        assert_eq!(lock.free_slots(), 2);

        lock.release_reader_slot(reader);
        let claimed = lock.claim_all_reader_slots(None).unwrap();
        assert_eq!(claimed.len(), 3);
        assert_eq!(lock.free_slots(), 0);
        for permit in claimed {
            lock.release_reader_slot(permit);
        }
        assert_eq!(lock.free_slots(), 3);
    }

    #[test]
    fn writer_token_is_exclusive() {
        let lock = ThreadLock::new(3).unwrap();
        let token = lock.acquire_writer_token(None).unwrap();
        let err = lock
            .acquire_writer_token(Some(Instant::now() + Duration::from_millis(20)))
            .unwrap_err();
        assert_eq!(err.to_string(), "timed out waiting for the writer token");

        lock.release_writer_token(token);
        let again = lock.acquire_writer_token(None).unwrap();
        lock.release_writer_token(again);
    }
}
