//! Cross-process exclusive file locks.
//!
//! Locks are OS advisory locks (`flock` on Unix, `LockFileEx` on Windows)
//! taken through `fs2`. The kernel drops them when the holding process dies,
//! so a crashed holder never blocks later invocations. The holder's pid is
//! written into the lock file purely so a timed-out waiter can say who is
//! holding it.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;

/// How often a waiting process retries the lock.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors raised while acquiring a lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock {path}{}", holder_suffix(.holder))]
    Timeout {
        path: PathBuf,
        waited: Duration,
        holder: Option<u32>,
    },

    #[error("failed to lock {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn holder_suffix(holder: &Option<u32>) -> String {
    holder
        .map(|pid| format!(" (held by pid {})", pid))
        .unwrap_or_default()
}

/// An exclusive lock that is released when dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock at `path`, waiting at most `timeout`.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<FileLock, LockError> {
        let started = Instant::now();

        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }

            if started.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: started.elapsed(),
                    holder: read_holder(path),
                });
            }

            tracing::debug!("Waiting for lock {}", path.display());
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Try to acquire the lock without waiting.
    pub fn try_acquire(path: &Path) -> Result<Option<FileLock>, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if is_contended(&e) => return Ok(None),
            Err(e) => return Err(io_err(e)),
        }

        let mut lock = FileLock {
            file,
            path: path.to_path_buf(),
        };
        lock.record_holder().map_err(io_err)?;
        tracing::debug!("Acquired lock {}", path.display());
        Ok(Some(lock))
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_holder(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        write!(self.file, "{}", std::process::id())?;
        self.file.flush()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release lock {}: {}", self.path.display(), e);
        } else {
            tracing::debug!("Released lock {}", self.path.display());
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn read_holder(path: &Path) -> Option<u32> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}
