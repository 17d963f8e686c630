//! JSON document read/write under the sidecar lock.
//!
//! # Responsibilities
//! - Read a top-level JSON object, classifying missing vs unparsable files
//! - Write with two-space indentation, atomically or in place
//! - Degrade to unlocked I/O when locking fails, and remember a broken primitive
//!
//! # Design Decisions
//! - Nothing here returns an I/O error to the caller: reads fall back to an
//!   empty document and writes report `false`, with the path in the log
//! - Atomic writes go through a temp file in the destination directory so the
//!   final rename never crosses filesystems

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::StoreConfig;
use crate::observability::metrics;
use crate::storage::lock::{platform_locker, FileLocker, LockError, LockMode, SidecarLock, LOCK_TIMEOUT};

/// A settings document: a JSON object.
pub type Document = serde_json::Map<String, Value>;

/// Result of reading a document from disk.
#[derive(Debug)]
pub enum ReadOutcome {
    Document(Document),
    /// The file does not exist. Expected on first start.
    NotFound,
    /// The file exists but is not a JSON object.
    Invalid(String),
    /// The file exists but could not be read.
    Unreadable(io::Error),
}

impl ReadOutcome {
    /// The document, or an empty one for every failure.
    pub fn into_document(self) -> Document {
        match self {
            ReadOutcome::Document(doc) => doc,
            _ => Document::new(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReadOutcome::NotFound)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReadOutcome::Document(_) => "ok",
            ReadOutcome::NotFound => "not_found",
            ReadOutcome::Invalid(_) => "invalid",
            ReadOutcome::Unreadable(_) => "unreadable",
        }
    }
}

/// Reads and writes JSON documents guarded by an inter-process lock.
#[derive(Debug)]
pub struct LockedFileStore {
    locker: Arc<dyn FileLocker>,
    locking_available: Arc<AtomicBool>,
    lock_timeout: Duration,
    write_delay: Option<Duration>,
}

impl Default for LockedFileStore {
    fn default() -> Self {
        Self::new(LOCK_TIMEOUT)
    }
}

impl LockedFileStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self::with_locker(platform_locker(), lock_timeout)
    }

    pub fn with_locker(locker: Arc<dyn FileLocker>, lock_timeout: Duration) -> Self {
        Self {
            locker,
            locking_available: Arc::new(AtomicBool::new(true)),
            lock_timeout,
            write_delay: None,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.lock_timeout())
    }

    /// Pause between opening the destination and writing to it. Fault injection
    /// for exercising concurrent readers against a slow writer.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// False once the locking primitive has failed; stays false for the
    /// lifetime of this store.
    pub fn is_locking_available(&self) -> bool {
        self.locking_available.load(Ordering::SeqCst)
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    fn lock(&self, path: &Path, mode: LockMode) -> Option<SidecarLock> {
        if !self.is_locking_available() {
            return None;
        }

        match SidecarLock::acquire(&self.locker, &self.locking_available, path, mode, self.lock_timeout) {
            Ok(lock) => Some(lock),
            Err(e @ LockError::Timeout { .. }) => {
                metrics::record_lock_degraded(mode.as_str());
                tracing::warn!(path = %path.display(), error = %e, "File lock timed out, continuing unlocked");
                None
            }
            Err(e @ LockError::Sidecar { .. }) => {
                metrics::record_lock_degraded(mode.as_str());
                tracing::warn!(path = %path.display(), error = %e, "File lock skipped");
                None
            }
            Err(e @ LockError::Unsupported { .. }) => {
                metrics::record_lock_degraded(mode.as_str());
                if self.locking_available.swap(false, Ordering::SeqCst) {
                    tracing::error!(path = %path.display(), error = %e, "File {} lock failed, locking disabled", mode.as_str());
                }
                None
            }
        }
    }

    /// Read the document at `path` under a shared lock.
    pub fn read(&self, path: &Path) -> ReadOutcome {
        let started = Instant::now();
        let guard = if parent_exists(path) {
            self.lock(path, LockMode::Shared)
        } else {
            None
        };

        let outcome = match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(doc)) => {
                    tracing::debug!(
                        path = %path.display(),
                        keys = doc.len(),
                        bytes = bytes.len(),
                        locked = guard.is_some(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Read settings document"
                    );
                    ReadOutcome::Document(doc)
                }
                Ok(other) => {
                    let message = format!("expected a JSON object, found {}", json_kind(&other));
                    tracing::error!(path = %path.display(), error = %message, "Reading failed");
                    ReadOutcome::Invalid(message)
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Reading failed");
                    ReadOutcome::Invalid(e.to_string())
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Reading skipped, file not found");
                ReadOutcome::NotFound
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Reading failed");
                ReadOutcome::Unreadable(e)
            }
        };

        drop(guard);
        outcome
    }

    /// Read the document at `path`, empty on any failure.
    pub fn read_document(&self, path: &Path) -> Document {
        self.read(path).into_document()
    }

    /// Write `document` to `path` under an exclusive lock. Returns false (and
    /// logs) on failure; the previous file is untouched when `atomic` is set.
    pub fn write(&self, document: &Document, path: &Path, atomic: bool) -> bool {
        let started = Instant::now();
        let output = match serde_json::to_string_pretty(document) {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Save failed, document not serializable");
                return false;
            }
        };

        if let Some(parent) = non_empty_parent(path) {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::error!(path = %path.display(), error = %e, "Save failed, cannot create directory");
                return false;
            }
        }

        let guard = self.lock(path, LockMode::Exclusive);
        let result = if atomic {
            write_atomic(path, output.as_bytes(), self.write_delay)
        } else {
            write_in_place(path, output.as_bytes(), self.write_delay)
        };
        let locked = guard.is_some();
        drop(guard);

        match result {
            Ok(()) => {
                tracing::debug!(
                    path = %path.display(),
                    keys = document.len(),
                    bytes = output.len(),
                    atomic,
                    locked,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Saved settings document"
                );
                true
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Save failed");
                false
            }
        }
    }
}

fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

fn parent_exists(path: &Path) -> bool {
    non_empty_parent(path).map_or(true, Path::is_dir)
}

fn write_atomic(path: &Path, bytes: &[u8], delay: Option<Duration>) -> io::Result<()> {
    let dir = non_empty_parent(path).unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".settings-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    if let Ok(existing) = fs::metadata(path) {
        let _ = tmp.as_file().set_permissions(existing.permissions());
    }
    if let Some(delay) = delay {
        std::thread::sleep(delay);
    }

    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir);
    Ok(())
}

fn write_in_place(path: &Path, bytes: &[u8], delay: Option<Duration>) -> io::Result<()> {
    let mut file = File::create(path)?;
    if let Some(delay) = delay {
        std::thread::sleep(delay);
    }
    file.write_all(bytes)?;
    file.flush()
}

/// Persist the rename itself. Best effort: not every platform can open a directory.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
