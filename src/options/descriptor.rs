//! Schema entries: one per setting key.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::options::value::{SettingValue, ValueKind};

/// Error returned by an onchange callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Invoked with the new effective value after a change is staged. An `Err`
/// rolls the change back.
pub type OnChange = Arc<dyn Fn(&SettingValue) -> Result<(), CallbackError> + Send + Sync>;

/// Accepts or rejects a proposed value.
pub type Validator = Arc<dyn Fn(&SettingValue) -> bool + Send + Sync>;

/// Grouping used for presentation: a group id (settings tab) and its label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Section {
    pub id: Option<String>,
    pub label: String,
}

impl Section {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            label: label.into(),
        }
    }

    /// Section without a tab.
    pub fn hidden(label: impl Into<String>) -> Self {
        Self {
            id: None,
            label: label.into(),
        }
    }
}

impl Default for Section {
    fn default() -> Self {
        Section::hidden("Hidden options")
    }
}

/// Declared default and metadata for one setting.
#[derive(Clone)]
pub struct SettingDescriptor {
    pub key: String,
    pub default: SettingValue,
    pub visible: bool,
    pub section: Section,
    pub onchange: Option<OnChange>,
    pub validator: Option<Validator>,
}

impl SettingDescriptor {
    pub fn new(key: impl Into<String>, default: impl Into<SettingValue>) -> Self {
        Self {
            key: key.into(),
            default: default.into(),
            visible: true,
            section: Section::default(),
            onchange: None,
            validator: None,
        }
    }

    pub fn section(mut self, section: Section) -> Self {
        self.section = section;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn on_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&SettingValue) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.onchange = Some(Arc::new(f));
        self
    }

    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&SettingValue) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    pub fn kind(&self) -> ValueKind {
        self.default.kind()
    }

    pub fn validate(&self, value: &SettingValue) -> bool {
        self.validator.as_ref().map_or(true, |check| check(value))
    }
}

impl fmt::Debug for SettingDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingDescriptor")
            .field("key", &self.key)
            .field("default", &self.default)
            .field("visible", &self.visible)
            .field("section", &self.section)
            .field("onchange", &self.onchange.is_some())
            .field("validator", &self.validator.is_some())
            .finish()
    }
}
