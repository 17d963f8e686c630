//! Lifecycle management for background work.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger → save queue drains pending saves → watcher stops
//!
//! Signals (signals.rs):
//!     SIGINT/Ctrl-C → trigger shutdown
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
