//! Locked file storage subsystem.
//!
//! # Data Flow
//! ```text
//! read:  acquire shared lock on <path>.lock (bounded wait)
//!     → read bytes → parse JSON object → release, drop sidecar if last holder
//!
//! write: serialize (2-space indent)
//!     → acquire exclusive lock on <path>.lock (bounded wait)
//!     → temp file + fsync + rename, or truncate + rewrite
//!     → release, drop sidecar
//! ```
//!
//! # Design Decisions
//! - Lock failure never blocks I/O: timeouts proceed unlocked for that call,
//!   a failed primitive turns locking off for the life of the store
//! - Missing files are normal (first start); unparsable files are logged and
//!   never overwritten by the read path

pub mod file;
pub mod lock;

pub use file::{Document, LockedFileStore, ReadOutcome};
pub use lock::{platform_locker, FileLocker, LockError, LockMode, SidecarLock, UnsupportedLocker};
