//! Persistence subsystem: getting settings to and from disk off the hot path.
//!
//! # Data Flow
//! ```text
//! set_and_save() / save_async()
//!     → queue.rs (pending path set, one worker task)
//!     → OptionsStore::save on the blocking pool
//!
//! external edit of the settings file
//!     → watcher.rs (notify event)
//!     → OptionsStore::load
//!     → ReloadEvent to subscribers
//! ```
//!
//! # Design Decisions
//! - No ordering between a background save and a later load on another
//!   thread; callers that need it await `flush()`
//! - `ConfigStore` is passed explicitly to consumers; there is no global

pub mod handle;
pub mod queue;
pub mod watcher;

pub use handle::ConfigStore;
pub use queue::SaveQueue;
pub use watcher::{ReloadEvent, SettingsWatcher};
