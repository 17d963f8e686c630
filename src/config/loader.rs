//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::StoreConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable that forces debug tracing on.
pub const DEBUG_ENV: &str = "OPTIONS_STORE_DEBUG";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<StoreConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text, then apply environment overrides.
pub fn parse_config(content: &str) -> Result<StoreConfig, ConfigError> {
    let mut config: StoreConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    apply_env_overrides(&mut config);

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Debug mode is switched on by the presence of [`DEBUG_ENV`], whatever its value.
pub fn apply_env_overrides(config: &mut StoreConfig) {
    if std::env::var_os(DEBUG_ENV).is_some() {
        config.debug = true;
    }
}
