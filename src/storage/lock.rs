//! Advisory reader/writer lock over a `<path>.lock` sidecar file.
//!
//! # Responsibilities
//! - Acquire a shared or exclusive lock with a bounded wait
//! - Remove the sidecar after release when this holder was the last one
//! - Report whether the locking primitive itself is usable
//!
//! # Design Decisions
//! - Non-blocking attempts in a retry loop, so the wait is bounded without
//!   signals or helper threads
//! - After acquiring, the sidecar is re-checked against the path: a previous
//!   holder may have unlinked it while we waited on the old inode
//! - The primitive sits behind [`FileLocker`] so platforms without `flock`
//!   (and tests) can plug in their own behavior

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Pause between non-blocking lock attempts.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Default bounded wait for a lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers at once.
    Shared,
    /// A single writer, no readers.
    Exclusive,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Shared => "read",
            LockMode::Exclusive => "write",
        }
    }
}

/// The OS-level locking primitive.
pub trait FileLocker: Send + Sync + fmt::Debug {
    /// Try once without blocking. `Ok(false)` means another holder has it;
    /// `Err` means the primitive itself failed.
    fn try_lock(&self, file: &File, mode: LockMode) -> io::Result<bool>;

    fn unlock(&self, file: &File) -> io::Result<()>;
}

/// `flock(2)` based locker.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct FlockLocker;

#[cfg(unix)]
impl FileLocker for FlockLocker {
    fn try_lock(&self, file: &File, mode: LockMode) -> io::Result<bool> {
        use std::os::unix::io::AsRawFd;

        let op = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        } | libc::LOCK_NB;

        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(true);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(false),
            _ => Err(err),
        }
    }

    fn unlock(&self, file: &File) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        // SAFETY: see `try_lock`.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Locker for platforms without an advisory lock primitive. Always fails, which
/// sends the file store into unlocked mode on first use.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedLocker;

impl FileLocker for UnsupportedLocker {
    fn try_lock(&self, _file: &File, _mode: LockMode) -> io::Result<bool> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "advisory file locks are not supported on this platform",
        ))
    }

    fn unlock(&self, _file: &File) -> io::Result<()> {
        Ok(())
    }
}

/// The best locker for the current platform.
pub fn platform_locker() -> Arc<dyn FileLocker> {
    #[cfg(unix)]
    {
        Arc::new(FlockLocker)
    }
    #[cfg(not(unix))]
    {
        Arc::new(UnsupportedLocker)
    }
}

/// `settings.json` → `settings.json.lock`
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut sidecar: OsString = path.as_os_str().to_owned();
    sidecar.push(".lock");
    PathBuf::from(sidecar)
}

#[derive(Debug, Error)]
pub enum LockError {
    /// Someone else held the lock for the whole wait.
    #[error("timed out after {waited:?} waiting for {mode} lock on {path}")]
    Timeout {
        path: PathBuf,
        mode: &'static str,
        waited: Duration,
    },

    /// The sidecar file could not be opened; only this attempt is affected.
    #[error("cannot open lock file {path}: {source}")]
    Sidecar {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The locking primitive failed; locking should not be attempted again.
    #[error("file locking unavailable for {path}: {source}")]
    Unsupported {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A held sidecar lock. Released (and the sidecar cleaned up) on drop.
#[derive(Debug)]
pub struct SidecarLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
    locker: Arc<dyn FileLocker>,
    available: Arc<AtomicBool>,
}

impl SidecarLock {
    /// Lock the sidecar of `target`, waiting at most `timeout`.
    ///
    /// `available` is cleared if unlocking fails later, so the owner stops
    /// using the primitive.
    pub fn acquire(
        locker: &Arc<dyn FileLocker>,
        available: &Arc<AtomicBool>,
        target: &Path,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<Self, LockError> {
        let path = sidecar_path(target);
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|source| LockError::Sidecar {
                    path: path.clone(),
                    source,
                })?;

            loop {
                match locker.try_lock(&file, mode) {
                    Ok(true) => break,
                    Ok(false) => {
                        if Instant::now() >= deadline {
                            return Err(LockError::Timeout {
                                path,
                                mode: mode.as_str(),
                                waited: started.elapsed(),
                            });
                        }
                        std::thread::sleep(LOCK_RETRY_INTERVAL);
                    }
                    Err(source) => return Err(LockError::Unsupported { path, source }),
                }
            }

            if is_current(&file, &path) {
                return Ok(Self {
                    file,
                    path,
                    mode,
                    locker: Arc::clone(locker),
                    available: Arc::clone(available),
                });
            }

            // The previous holder unlinked the sidecar while we waited on it.
            let _ = locker.unlock(&file);
            if Instant::now() >= deadline {
                return Err(LockError::Timeout {
                    path,
                    mode: mode.as_str(),
                    waited: started.elapsed(),
                });
            }
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn sidecar(&self) -> &Path {
        &self.path
    }

    /// Remove the sidecar if nobody else holds it. An exclusive holder is alone
    /// by definition; a shared holder checks by trying to upgrade.
    fn cleanup(&self) {
        let sole_holder = match self.mode {
            LockMode::Exclusive => true,
            LockMode::Shared => matches!(self.locker.try_lock(&self.file, LockMode::Exclusive), Ok(true)),
        };
        if !sole_holder {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Lock file cleanup failed");
            }
        }
    }
}

impl Drop for SidecarLock {
    fn drop(&mut self) {
        self.cleanup();
        if let Err(e) = self.locker.unlock(&self.file) {
            self.available.store(false, Ordering::SeqCst);
            tracing::error!(path = %self.path.display(), error = %e, "File unlock failed, disabling file locking");
        }
    }
}

/// True if `file` is still the inode that `path` names.
#[cfg(unix)]
fn is_current(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(named)) => held.dev() == named.dev() && held.ino() == named.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_current(_file: &File, path: &Path) -> bool {
    path.exists()
}
