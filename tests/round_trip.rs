//! Persistence round trips: save then load on a fresh store.

use serde_json::json;

use options_store::config::LegacyListConfig;
use options_store::{SettingValue, StoreConfig};

mod common;

#[test]
fn test_save_then_load_reproduces_every_value() {
    let (_dir, path) = common::settings_file();
    let store = common::store();
    assert!(store.set("steps", 42).unwrap());
    assert!(store.set("cfg_scale", 9).unwrap());
    assert!(store.set("sampler", "DPM++ 2M").unwrap());
    assert!(store.set("show_progress", false).unwrap());
    assert!(store.set("quicksettings_list", vec!["sd_vae", "CLIP_stop_at_last_layers"]).unwrap());
    assert!(store.save(&path));

    let fresh = common::store();
    let report = fresh.load(&path);
    assert!(!report.failed);
    assert!(report.rejected.is_empty());

    for key in store.registry().keys() {
        assert_eq!(fresh.get(&key).unwrap(), store.get(&key).unwrap(), "key {}", key);
    }
    assert_eq!(fresh.get("cfg_scale").unwrap(), SettingValue::Float(9.0));
}

#[test]
fn test_saved_document_holds_only_changed_keys() {
    let (_dir, path) = common::settings_file();
    let store = common::store();
    store.set("steps", 30).unwrap();
    store.set("steps", 20).unwrap();
    store.set("sampler", "DDIM").unwrap();
    store.set("quicksettings_list", vec!["sd_model_checkpoint"]).unwrap();
    assert!(store.save(&path));

    assert_eq!(common::read_json(&path), json!({ "sampler": "DDIM" }));
}

#[test]
fn test_list_restored_to_default_is_dropped() {
    let (_dir, path) = common::settings_file();
    let store = common::store();
    store.set("quicksettings_list", vec!["a", "b"]).unwrap();
    store.save(&path);
    assert_eq!(common::read_json(&path), json!({ "quicksettings_list": ["a", "b"] }));

    let reordered = common::store();
    reordered.load(&path);
    reordered.set("quicksettings_list", vec!["sd_model_checkpoint"]).unwrap();
    reordered.save(&path);
    assert_eq!(common::read_json(&path), json!({}));
}

#[test]
fn test_unknown_keys_survive_load_and_save() {
    let (_dir, path) = common::settings_file();
    common::write_json(&path, &json!({ "made_up_key": 42, "steps": 25 }));

    let store = common::store();
    let report = store.load(&path);
    assert_eq!(report.unknown, vec!["made_up_key".to_string()]);
    assert_eq!(store.unknown_keys(), vec!["made_up_key".to_string()]);
    assert!(store.save(&path));

    assert_eq!(common::read_json(&path), json!({ "made_up_key": 42, "steps": 25 }));
}

#[test]
fn test_wrong_type_falls_back_to_default() {
    let (_dir, path) = common::settings_file();
    common::write_json(&path, &json!({ "steps": "many", "show_progress": 1, "cfg_scale": 5 }));

    let store = common::store();
    let report = store.load(&path);
    assert_eq!(report.rejected, vec!["show_progress".to_string(), "steps".to_string()]);
    assert_eq!(store.get("steps").unwrap(), SettingValue::Int(20));
    assert_eq!(store.get("show_progress").unwrap(), SettingValue::Bool(true));
    assert_eq!(store.get("cfg_scale").unwrap(), SettingValue::Float(5.0));
}

#[test]
fn test_failed_validator_falls_back_to_default() {
    let (_dir, path) = common::settings_file();
    common::write_json(&path, &json!({ "steps": 1000 }));

    let store = common::store();
    let report = store.load(&path);
    assert_eq!(report.rejected, vec!["steps".to_string()]);
    assert_eq!(store.get_int("steps").unwrap(), 20);
}

#[test]
fn test_cast_value_follows_default_type() {
    let store = common::store();
    assert_eq!(store.cast_value("steps", &json!("7")).unwrap(), SettingValue::Int(7));
    assert_eq!(store.cast_value("show_progress", &json!("False")).unwrap(), SettingValue::Bool(false));
    assert_eq!(store.cast_value("cfg_scale", &json!("7.5")).unwrap(), SettingValue::Float(7.5));
    assert!(store.cast_value("steps", &json!("seven")).is_err());
}

#[test]
fn test_legacy_comma_list_is_split() {
    let (_dir, path) = common::settings_file();
    common::write_json(&path, &json!({ "quicksettings": "sd_model_checkpoint, sd_vae,," }));

    let store = common::store();
    store.load(&path);
    assert_eq!(
        store.get_list("quicksettings_list").unwrap(),
        vec!["sd_model_checkpoint".to_string(), "sd_vae".to_string()]
    );

    store.save(&path);
    let saved = common::read_json(&path);
    assert_eq!(saved["quicksettings_list"], json!(["sd_model_checkpoint", "sd_vae"]));
    assert_eq!(saved["quicksettings"], json!("sd_model_checkpoint, sd_vae,,"));
}

#[test]
fn test_modern_list_wins_over_legacy() {
    let (_dir, path) = common::settings_file();
    common::write_json(&path, &json!({ "quicksettings": "a,b", "quicksettings_list": ["c"] }));

    let store = common::store();
    store.load(&path);
    assert_eq!(store.get_list("quicksettings_list").unwrap(), vec!["c".to_string()]);
}

#[test]
fn test_custom_legacy_pair() {
    let (_dir, path) = common::settings_file();
    common::write_json(&path, &json!({ "old_tabs": "txt2img,img2img" }));

    let config = StoreConfig {
        legacy_lists: vec![LegacyListConfig {
            legacy: "old_tabs".to_string(),
            modern: "quicksettings_list".to_string(),
        }],
        ..StoreConfig::default()
    };
    let store = common::store_with(&config);
    store.load(&path);
    assert_eq!(
        store.get_list("quicksettings_list").unwrap(),
        vec!["txt2img".to_string(), "img2img".to_string()]
    );
}

#[test]
fn test_compatibility_and_quiet_keys() {
    let (_dir, path) = common::settings_file();
    common::write_json(&path, &json!({ "clip_skip": 2, "uiux_theme": "dark", "mystery": true }));

    let store = common::store();
    let report = store.load(&path);
    assert_eq!(report.unknown, vec!["mystery".to_string()]);
    assert_eq!(store.get("clip_skip").unwrap(), SettingValue::Int(2));

    store.save(&path);
    assert_eq!(common::read_json(&path), json!({ "uiux_theme": "dark", "mystery": true }));
}

#[test]
fn test_missing_file_is_created() {
    let (dir, _) = common::settings_file();
    let path = dir.path().join("nested").join("config.json");

    let store = common::store();
    let report = store.load(&path);
    assert!(report.created);
    assert_eq!(common::read_json(&path), json!({}));
}

#[test]
fn test_reload_reports_changed_keys() {
    let (_dir, path) = common::settings_file();
    let store = common::store();
    store.load(&path);

    common::write_json(&path, &json!({ "steps": 40, "extra": "x" }));
    let report = store.load(&path);
    assert_eq!(report.changed, vec!["steps".to_string(), "extra".to_string()]);

    let again = store.load(&path);
    assert!(again.changed.is_empty());
}
