//! Store configuration subsystem.
//!
//! # Data Flow
//! ```text
//! store config file (TOML)
//!     → loader.rs (parse & deserialize, environment overrides)
//!     → validation.rs (semantic checks)
//!     → StoreConfig (validated, immutable)
//!     → handed to the storage and options layers at startup
//! ```
//!
//! # Design Decisions
//! - All fields have defaults so an absent file yields a working store
//! - Validation separates syntactic (serde) from semantic checks
//! - This configures the store itself; the settings it manages live in
//!   the JSON diff document, not here

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{LegacyListConfig, StoreConfig};
