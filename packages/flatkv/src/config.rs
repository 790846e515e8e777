//! Accessor configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AccessError;
use crate::sync::{AccessLock, ProcessLock, ThreadLock};

/// Reader slots when none are configured.
pub const DEFAULT_MAX_READERS: usize = 10;

/// How often the process backend re-checks a busy reader slot.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Which kind of participant the lock coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockMode {
    /// Threads of one process sharing the accessor.
    #[default]
    Threads,
    /// Independent processes sharing a lock directory.
    Processes,
}

impl FromStr for LockMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "threads" => Ok(Self::Threads),
            "processes" => Ok(Self::Processes),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Threads => f.write_str("threads"),
            Self::Processes => f.write_str("processes"),
        }
    }
}

/// Invalid accessor configuration. Always fatal at construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown concurrency mode {0:?} (expected \"threads\" or \"processes\")")]
    UnknownMode(String),
    #[error("max_readers must be at least 1")]
    ZeroReaders,
    #[error(
        "lock directory {} was created for {existing} reader slots, not {configured}",
        dir.display()
    )]
    SlotCountMismatch {
        dir: PathBuf,
        existing: usize,
        configured: usize,
    },
}

/// Everything needed to build a [`SyncAccessor`](crate::SyncAccessor).
#[derive(Debug, Clone)]
pub struct AccessorConfig {
    /// Store file.
    pub path: PathBuf,
    /// Concurrent readers allowed; writers claim all of them.
    pub max_readers: usize,
    pub mode: LockMode,
    /// Lock directory for [`LockMode::Processes`]. Defaults to
    /// `<store file name>.locks` next to the store file.
    pub lock_dir: Option<PathBuf>,
    /// Bound on every lock wait. `None` waits forever.
    pub lock_timeout: Option<Duration>,
    /// Poll interval of the process backend.
    pub poll_interval: Duration,
}

impl AccessorConfig {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_readers: DEFAULT_MAX_READERS,
            mode: LockMode::default(),
            lock_dir: None,
            lock_timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_max_readers(mut self, max_readers: usize) -> Self {
        self.max_readers = max_readers;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: LockMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_lock_dir(mut self, lock_dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(lock_dir.into());
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroReaders`] if `max_readers` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_readers == 0 {
            return Err(ConfigError::ZeroReaders);
        }
        Ok(())
    }

    /// The configured lock directory, or the default derived from the
    /// store path.
    #[must_use]
    pub fn lock_dir(&self) -> PathBuf {
        if let Some(dir) = &self.lock_dir {
            return dir.clone();
        }
        let mut name = self
            .path
            .file_name()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| "store".into());
        name.push(".locks");
        self.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(name)
    }

    /// Builds the lock backend selected by [`mode`](Self::mode).
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Config`] for invalid settings and
    /// [`AccessError::Lock`] if the process backend cannot set up its
    /// lock directory, or a writer holds the token past `lock_timeout`.
    pub fn build_lock(&self) -> Result<Arc<dyn AccessLock>, AccessError> {
        self.validate()?;
        let lock: Arc<dyn AccessLock> = match self.mode {
            LockMode::Threads => Arc::new(ThreadLock::new(self.max_readers)?),
            LockMode::Processes => Arc::new(ProcessLock::open_with_timeout(
                self.lock_dir(),
                self.max_readers,
                self.poll_interval,
                self.lock_timeout,
            )?),
        };
        Ok(lock)
    }
}
