//! Options subsystem: typed settings over a schema.
//!
//! # Data Flow
//! ```text
//! SchemaRegistry (descriptors, built once at startup, append-only)
//!     → OptionsStore starts with every key at its default
//!     → load(): diff document from storage, validated and cast per descriptor
//!     → set()/reset(): stage → onchange callbacks → commit or roll back
//!     → save(): diff against defaults → storage (atomic write)
//! ```
//!
//! # Design Decisions
//! - A key's kind is fixed by its default; loaded values of another kind fall
//!   back to the default rather than failing the load
//! - List settings compare as sets when diffing, since their order on disk
//!   carries no meaning
//! - Unknown keys are carried through load/save untouched

pub mod descriptor;
pub mod error;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod value;

pub use descriptor::{CallbackError, OnChange, Section, SettingDescriptor, Validator};
pub use error::{ErrorReporter, StoreError};
pub use registry::SchemaRegistry;
pub use snapshot::{Snapshot, SnapshotMeta};
pub use store::{LoadReport, OptionsStore, StorePolicy};
pub use value::{CastError, SettingValue, ValueKind};
