//! Cross-process backend on advisory file locks.
//!
//! Layout of the lock directory:
//!
//! ```text
//! <dir>/slots          slot count, written once by the first opener
//! <dir>/writer.lock    writer token, also the reader turnstile
//! <dir>/reader-<i>.lock  one file per reader slot, 0 <= i < slots
//! ```
//!
//! A reader takes a shared lock on `writer.lock` and drops it straight away
//! (the turnstile), then holds an exclusive lock on any free `reader-<i>.lock`.
//! A writer holds `writer.lock` exclusively and then every reader slot in
//! index order. While a writer holds the token no new reader gets past the
//! turnstile, so a writer only waits for the readers already inside.
//!
//! The OS drops a lock when its file handle closes, including when the
//! holding process dies, so a crashed participant never wedges the store.
//! Every acquisition opens its own handle: locks belong to the open file,
//! so two handles in one process exclude each other like two processes do.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use super::{AccessLock, LockError, Permit};
use crate::config::ConfigError;
use crate::error::AccessError;

const SLOTS_FILE: &str = "slots";
const WRITER_FILE: &str = "writer.lock";

/// Reader slots and writer token backed by advisory locks on files in one
/// directory, shared by every process that opens the same directory.
#[derive(Debug)]
pub struct ProcessLock {
    dir: PathBuf,
    max_readers: usize,
    poll_interval: Duration,
    next_slot: AtomicUsize,
}

#[derive(Clone, Copy)]
enum Mode {
    Shared,
    Exclusive,
}

impl ProcessLock {
    /// Opens (creating if needed) the lock directory for `max_readers`
    /// slots.
    ///
    /// The first opener records the slot count; later openers must agree
    /// with it, since a writer that claims fewer slots than readers use
    /// would no longer be exclusive.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroReaders`], [`ConfigError::SlotCountMismatch`], or
    /// [`LockError::Io`] if the directory or its files cannot be used.
    pub fn open(
        dir: impl Into<PathBuf>,
        max_readers: usize,
        poll_interval: Duration,
    ) -> Result<Self, AccessError> {
        Self::open_with_timeout(dir, max_readers, poll_interval, None)
    }

    /// Like [`open`](Self::open), but gives up waiting for the writer token
    /// once `lock_timeout` has passed.
    ///
    /// # Errors
    ///
    /// As for [`open`](Self::open), plus [`LockError::Timeout`] when a
    /// writer keeps the token past `lock_timeout`.
    pub fn open_with_timeout(
        dir: impl Into<PathBuf>,
        max_readers: usize,
        poll_interval: Duration,
        lock_timeout: Option<Duration>,
    ) -> Result<Self, AccessError> {
        if max_readers == 0 {
            return Err(ConfigError::ZeroReaders.into());
        }
        let lock = Self {
            dir: dir.into(),
            max_readers,
            poll_interval,
            next_slot: AtomicUsize::new(0),
        };

        fs::create_dir_all(&lock.dir).map_err(|source| LockError::Io {
            path: lock.dir.clone(),
            source,
        })?;

        // Holding the writer token keeps two first openers from racing on
        // the slot count.
        let deadline = lock_timeout.map(|timeout| Instant::now() + timeout);
        let token = lock.acquire_writer_token(deadline)?;
        let recorded = lock.record_slot_count();
        lock.release_writer_token(token);
        recorded?;

        for index in 0..max_readers {
            open_lock_file(&lock.slot_path(index))?;
        }

        tracing::debug!(
            dir = %lock.dir.display(),
            max_readers,
            "lock directory ready"
        );
        Ok(lock)
    }

    /// Directory holding the slot count and lock files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sleep between attempts while waiting with a deadline.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn slot_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("reader-{index}.lock"))
    }

    fn writer_path(&self) -> PathBuf {
        self.dir.join(WRITER_FILE)
    }

    fn record_slot_count(&self) -> Result<(), AccessError> {
        let path = self.dir.join(SLOTS_FILE);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let existing: usize = contents.trim().parse().map_err(|_| LockError::Io {
                    path: path.clone(),
                    source: io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unreadable slot count {:?}", contents.trim()),
                    ),
                })?;
                if existing != self.max_readers {
                    return Err(ConfigError::SlotCountMismatch {
                        dir: self.dir.clone(),
                        existing,
                        configured: self.max_readers,
                    }
                    .into());
                }
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                fs::write(&path, format!("{}\n", self.max_readers))
                    .map_err(|source| LockError::Io { path, source })?;
                Ok(())
            }
            Err(source) => Err(LockError::Io { path, source }.into()),
        }
    }

    /// Single non-blocking attempt. `Ok(None)` means someone else holds it.
    fn try_lock(&self, path: &Path, mode: Mode) -> Result<Option<File>, LockError> {
        let file = open_lock_file(path)?;
        let attempt = match mode {
            Mode::Shared => FileExt::try_lock_shared(&file),
            Mode::Exclusive => FileExt::try_lock_exclusive(&file),
        };
        match attempt {
            Ok(()) => Ok(Some(file)),
            Err(err) if is_contended(&err) => Ok(None),
            Err(source) => Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Blocks in the kernel when there is no deadline, polls otherwise.
    fn lock(
        &self,
        path: &Path,
        mode: Mode,
        deadline: Option<Instant>,
        what: &'static str,
    ) -> Result<File, LockError> {
        if deadline.is_none() {
            let file = open_lock_file(path)?;
            let result = match mode {
                Mode::Shared => FileExt::lock_shared(&file),
                Mode::Exclusive => FileExt::lock_exclusive(&file),
            };
            return result.map(|()| file).map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            });
        }

        loop {
            if let Some(file) = self.try_lock(path, mode)? {
                return Ok(file);
            }
            self.pause_until(deadline, what)?;
        }
    }

    fn pause_until(&self, deadline: Option<Instant>, what: &'static str) -> Result<(), LockError> {
        let pause = match deadline {
            None => self.poll_interval,
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(LockError::Timeout { what });
                }
                self.poll_interval.min(deadline - now)
            }
        };
        thread::sleep(pause);
        Ok(())
    }

    /// Waits until no writer holds the token. The shared lock is dropped
    /// before returning.
    fn pass_turnstile(&self, deadline: Option<Instant>) -> Result<(), LockError> {
        let file = self.lock(&self.writer_path(), Mode::Shared, deadline, "a reader slot")?;
        unlock(&file, &self.writer_path());
        Ok(())
    }

    /// One pass over every slot, starting from a rotating offset so that
    /// readers in one process spread across slots.
    fn scan_slots(&self) -> Result<Option<Permit>, LockError> {
        let start = self.next_slot.fetch_add(1, Ordering::Relaxed);
        for step in 0..self.max_readers {
            let index = (start + step) % self.max_readers;
            if let Some(file) = self.try_lock(&self.slot_path(index), Mode::Exclusive)? {
                tracing::trace!(slot = index, "reader slot taken");
                return Ok(Some(Permit::file(Some(index), file)));
            }
        }
        Ok(None)
    }
}

impl AccessLock for ProcessLock {
    fn max_readers(&self) -> usize {
        self.max_readers
    }

    fn acquire_reader_slot(&self, deadline: Option<Instant>) -> Result<Permit, LockError> {
        loop {
            self.pass_turnstile(deadline)?;
            if let Some(permit) = self.scan_slots()? {
                return Ok(permit);
            }
            self.pause_until(deadline, "a reader slot")?;
        }
    }

    fn try_acquire_reader_slot(&self) -> Result<Option<Permit>, LockError> {
        let writer_path = self.writer_path();
        let Some(turnstile) = self.try_lock(&writer_path, Mode::Shared)? else {
            return Ok(None);
        };
        unlock(&turnstile, &writer_path);
        self.scan_slots()
    }

    fn claim_reader_slot(
        &self,
        index: usize,
        deadline: Option<Instant>,
    ) -> Result<Permit, LockError> {
        let path = self.slot_path(index);
        let file = self.lock(&path, Mode::Exclusive, deadline, "a reader slot")?;
        Ok(Permit::file(Some(index), file))
    }

    fn release_reader_slot(&self, permit: Permit) {
        let index = permit.slot();
        if let (Some(index), Some(file)) = (index, permit.into_handle()) {
            unlock(&file, &self.slot_path(index));
        }
    }

    fn acquire_writer_token(&self, deadline: Option<Instant>) -> Result<Permit, LockError> {
        let file = self.lock(&self.writer_path(), Mode::Exclusive, deadline, "the writer token")?;
        Ok(Permit::file(None, file))
    }

    fn release_writer_token(&self, permit: Permit) {
        if let Some(file) = permit.into_handle() {
            unlock(&file, &self.writer_path());
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File, LockError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Explicit unlock; closing the handle right after releases it regardless.
fn unlock(file: &File, path: &Path) {
    if let Err(err) = FileExt::unlock(file) {
        tracing::warn!(path = %path.display(), error = %err, "failed to unlock lock file");
    }
}
