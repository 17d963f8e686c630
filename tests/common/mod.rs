//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;

use options_store::options::{Section, SettingDescriptor, StorePolicy};
use options_store::{LockedFileStore, OptionsStore, SchemaRegistry, StoreConfig};

/// A small schema covering every value kind.
pub fn schema() -> SchemaRegistry {
    let sd = Section::new("sd", "Stable Diffusion");
    let ui = Section::new("ui", "User interface");
    SchemaRegistry::from_descriptors(vec![
        SettingDescriptor::new("steps", 20)
            .section(sd.clone())
            .validator(|v| v.as_int().is_some_and(|n| (1..=150).contains(&n))),
        SettingDescriptor::new("cfg_scale", 7.0).section(sd.clone()),
        SettingDescriptor::new("sampler", "Euler").section(sd),
        SettingDescriptor::new("show_progress", true).section(ui.clone()),
        SettingDescriptor::new("quicksettings_list", vec!["sd_model_checkpoint"]).section(ui),
        SettingDescriptor::new("outdir_samples", ""),
    ])
    .expect("fixture schema has unique keys")
}

pub fn store() -> OptionsStore {
    OptionsStore::new(schema(), LockedFileStore::default(), StorePolicy::default())
}

pub fn store_with(config: &StoreConfig) -> OptionsStore {
    OptionsStore::from_config(schema(), config)
}

/// A temp dir and a settings path inside it. Keep the dir alive for the test.
pub fn settings_file() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("config.json");
    (dir, path)
}

pub fn write_json(path: &Path, value: &Value) {
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

pub fn read_json(path: &Path) -> Value {
    let text = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&text).unwrap()
}
