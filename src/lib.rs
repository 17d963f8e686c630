//! Persistent application settings over a schema.
//!
//! A schema of typed settings with defaults, an options store that layers
//! current values over those defaults, and a locked JSON file that persists
//! only the values that differ from their defaults.

pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod options;
pub mod persistence;
pub mod storage;

pub use config::StoreConfig;
pub use lifecycle::Shutdown;
pub use options::{OptionsStore, SchemaRegistry, SettingDescriptor, SettingValue, StoreError};
pub use persistence::ConfigStore;
pub use storage::{LockedFileStore, ReadOutcome};
