//! Options store errors.

use std::sync::Arc;

use thiserror::Error;

use crate::options::value::{CastError, ValueKind};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Neither stored nor declared.
    #[error("unknown setting: {0}")]
    UnknownKey(String),

    /// A descriptor with this key is already registered.
    #[error("setting already registered: {0}")]
    DuplicateKey(String),

    #[error("setting {key}: expected {expected}, got {found}")]
    TypeMismatch {
        key: String,
        expected: ValueKind,
        found: String,
    },

    #[error("setting {key}: {source}")]
    Cast {
        key: String,
        #[source]
        source: CastError,
    },

    #[error("setting {key}: value {value} rejected by validator")]
    Invalid { key: String, value: String },

    #[error("settings are frozen: {0}")]
    Frozen(String),

    #[error("setting is restricted: {0}")]
    Restricted(String),

    /// An onchange callback failed or panicked; the change was rolled back.
    #[error("onchange callback for {key} failed: {message}")]
    Callback { key: String, message: String },
}

/// Receives errors that should reach the user, not just the log.
pub type ErrorReporter = Arc<dyn Fn(&StoreError) + Send + Sync>;
