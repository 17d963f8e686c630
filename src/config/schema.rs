//! Store configuration schema.
//!
//! All types derive Serde traits for deserialization from TOML.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the options store.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the persisted settings diff document.
    pub settings_path: PathBuf,

    /// Bounded wait for the sidecar file lock, in seconds.
    pub lock_timeout_secs: u64,

    /// Write the settings document via temp file + rename.
    pub atomic_writes: bool,

    /// Verbose trace logging of every set/load/save.
    pub debug: bool,

    /// Reject all mutations and skip saves.
    pub frozen: bool,

    /// Reject changes to `restricted_keys`.
    pub restrict_dir_settings: bool,

    /// Keys guarded by `restrict_dir_settings`.
    pub restricted_keys: Vec<String>,

    /// Keys tolerated on load without a schema entry and never persisted.
    pub compatibility_keys: Vec<String>,

    /// Unknown keys with these prefixes are kept but not reported.
    pub quiet_unknown_prefixes: Vec<String>,

    /// Old comma-joined string keys and the list keys that replaced them.
    pub legacy_lists: Vec<LegacyListConfig>,

    /// Reload the store when the settings file changes on disk.
    pub watch: bool,
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from("config.json"),
            lock_timeout_secs: 3,
            atomic_writes: true,
            debug: false,
            frozen: false,
            restrict_dir_settings: false,
            restricted_keys: [
                "samples_filename_pattern",
                "directories_filename_pattern",
                "outdir_samples",
                "outdir_txt2img_samples",
                "outdir_img2img_samples",
                "outdir_extras_samples",
                "outdir_control_samples",
                "outdir_grids",
                "outdir_txt2img_grids",
                "outdir_save",
                "outdir_init_images",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            compatibility_keys: vec![
                "clip_skip".to_string(),
                "uni_pc_lower_order_final".to_string(),
                "uni_pc_order".to_string(),
            ],
            quiet_unknown_prefixes: vec!["uiux_".to_string()],
            legacy_lists: vec![LegacyListConfig {
                legacy: "quicksettings".to_string(),
                modern: "quicksettings_list".to_string(),
            }],
            watch: false,
        }
    }
}

/// A comma-joined legacy key split into a list-valued key on load.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LegacyListConfig {
    /// Old key holding `"a, b, c"`.
    pub legacy: String,

    /// Current key holding `["a", "b", "c"]`.
    pub modern: String,
}
