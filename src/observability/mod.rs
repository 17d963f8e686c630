//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! storage, options and persistence produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters)
//!
//! Consumers:
//!     → stderr via the tracing fmt layer
//!     → whatever metrics recorder the host installs
//! ```
//!
//! # Design Decisions
//! - Debug mode changes verbosity only, never behavior
//! - Metrics go through the `metrics` facade; without a recorder they are no-ops

pub mod logging;
pub mod metrics;
