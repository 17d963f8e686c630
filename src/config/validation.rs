//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (lock timeout bounded, path present)
//! - Detect conflicting key lists
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: StoreConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;

use crate::config::schema::StoreConfig;

/// Upper bound for the lock wait; anything longer looks like a hang to callers.
pub const MAX_LOCK_TIMEOUT_SECS: u64 = 300;

/// A single semantic problem in a [`StoreConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &StoreConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.settings_path.as_os_str().is_empty() {
        errors.push(ValidationError::new("settings_path", "must not be empty"));
    }

    if config.lock_timeout_secs == 0 || config.lock_timeout_secs > MAX_LOCK_TIMEOUT_SECS {
        errors.push(ValidationError::new(
            "lock_timeout_secs",
            format!(
                "must be between 1 and {}, got {}",
                MAX_LOCK_TIMEOUT_SECS, config.lock_timeout_secs
            ),
        ));
    }

    let mut seen_modern = HashSet::new();
    for pair in &config.legacy_lists {
        if pair.legacy.is_empty() || pair.modern.is_empty() {
            errors.push(ValidationError::new("legacy_lists", "keys must not be empty"));
        } else if pair.legacy == pair.modern {
            errors.push(ValidationError::new(
                "legacy_lists",
                format!("legacy and modern key are both '{}'", pair.legacy),
            ));
        }
        if !seen_modern.insert(pair.modern.as_str()) {
            errors.push(ValidationError::new(
                "legacy_lists",
                format!("'{}' is the target of more than one legacy key", pair.modern),
            ));
        }
    }

    let restricted: HashSet<&str> = config.restricted_keys.iter().map(String::as_str).collect();
    for key in &config.compatibility_keys {
        if restricted.contains(key.as_str()) {
            errors.push(ValidationError::new(
                "compatibility_keys",
                format!("'{}' is also a restricted key", key),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LegacyListConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&StoreConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = StoreConfig::default();
        config.lock_timeout_secs = 1000;
        config.settings_path = "".into();
        config.legacy_lists.push(LegacyListConfig {
            legacy: "same".into(),
            modern: "same".into(),
        });
        config.compatibility_keys.push("outdir_grids".into());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["settings_path", "lock_timeout_secs", "legacy_lists", "compatibility_keys"]
        );
    }

    #[test]
    fn test_duplicate_modern_key() {
        let mut config = StoreConfig::default();
        config.legacy_lists.push(LegacyListConfig {
            legacy: "quick".into(),
            modern: "quicksettings_list".into(),
        });
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("quicksettings_list"));
    }
}
