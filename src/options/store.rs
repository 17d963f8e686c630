//! The options store: current values layered over schema defaults.
//!
//! # Responsibilities
//! - Resolve reads: stored value, else schema default
//! - Apply changes with onchange callbacks and rollback on failure
//! - Load a persisted diff document (validate, cast, keep unknown keys)
//! - Compute and save the minimal diff against defaults
//!
//! # Design Decisions
//! - Mutations are serialized by a reentrant lock, so a callback may call back
//!   into the store on the same thread; the state map itself is only locked
//!   for short, callback-free sections
//! - Keys without a schema entry live in a separate map and are written back
//!   verbatim, so older or newer builds never lose each other's settings

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use parking_lot::{ReentrantMutex, RwLock};
use serde_json::Value;

use crate::config::{LegacyListConfig, StoreConfig};
use crate::observability::metrics;
use crate::options::descriptor::{CallbackError, OnChange, SettingDescriptor};
use crate::options::error::{ErrorReporter, StoreError};
use crate::options::registry::SchemaRegistry;
use crate::options::snapshot::{Snapshot, SnapshotMeta};
use crate::options::value::{json_type_name, split_list, SettingValue, ValueKind};
use crate::storage::{Document, LockedFileStore, ReadOutcome};

/// Store behavior switches, derived from [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct StorePolicy {
    pub frozen: bool,
    pub restrict_dir_settings: bool,
    pub restricted_keys: HashSet<String>,
    pub compatibility_keys: HashSet<String>,
    pub quiet_unknown_prefixes: Vec<String>,
    pub legacy_lists: Vec<LegacyListConfig>,
    pub atomic_writes: bool,
    pub debug: bool,
}

impl StorePolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            frozen: config.frozen,
            restrict_dir_settings: config.restrict_dir_settings,
            restricted_keys: config.restricted_keys.iter().cloned().collect(),
            compatibility_keys: config.compatibility_keys.iter().cloned().collect(),
            quiet_unknown_prefixes: config.quiet_unknown_prefixes.clone(),
            legacy_lists: config.legacy_lists.clone(),
            atomic_writes: config.atomic_writes,
            debug: config.debug,
        }
    }

    /// Whether `key` may be changed under this policy.
    pub fn check_writable(&self, key: &str) -> Result<(), StoreError> {
        if self.frozen {
            tracing::warn!(key = %key, "Settings are frozen");
            return Err(StoreError::Frozen(key.to_string()));
        }
        if self.is_restricted(key) {
            tracing::warn!(key = %key, "Settings key is restricted");
            return Err(StoreError::Restricted(key.to_string()));
        }
        Ok(())
    }

    fn is_compatibility(&self, key: &str) -> bool {
        self.compatibility_keys.contains(key)
    }

    fn is_quiet(&self, key: &str) -> bool {
        self.quiet_unknown_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    fn is_restricted(&self, key: &str) -> bool {
        self.restrict_dir_settings && self.restricted_keys.contains(key)
    }
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct OptionsState {
    /// Explicitly stored values of schema keys.
    values: HashMap<String, SettingValue>,
    /// Keys with no schema entry, kept as loaded.
    unknown: BTreeMap<String, Value>,
}

/// What a [`OptionsStore::load`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// The file did not exist and was created from the current state.
    pub created: bool,
    /// The file existed but could not be used; in-memory state was kept.
    pub failed: bool,
    /// Keys accepted from the document, schema and unknown alike.
    pub loaded: usize,
    /// Schema keys whose stored value was rejected and replaced by the default.
    pub rejected: Vec<String>,
    /// Unknown keys worth reporting (compatibility keys and quiet prefixes excluded).
    pub unknown: Vec<String>,
    /// Keys whose effective value differs from before the load.
    pub changed: Vec<String>,
}

pub struct OptionsStore {
    registry: SchemaRegistry,
    state: Mutex<OptionsState>,
    listeners: DashMap<String, Vec<OnChange>>,
    files: LockedFileStore,
    policy: StorePolicy,
    mutation: ReentrantMutex<()>,
    reporter: RwLock<Option<ErrorReporter>>,
    /// Last document this store wrote to each path.
    written: DashMap<PathBuf, Document>,
}

impl OptionsStore {
    pub fn new(registry: SchemaRegistry, files: LockedFileStore, policy: StorePolicy) -> Self {
        Self {
            registry,
            state: Mutex::new(OptionsState::default()),
            listeners: DashMap::new(),
            files,
            policy,
            mutation: ReentrantMutex::new(()),
            reporter: RwLock::new(None),
            written: DashMap::new(),
        }
    }

    pub fn from_config(registry: SchemaRegistry, config: &StoreConfig) -> Self {
        Self::new(registry, LockedFileStore::from_config(config), StorePolicy::from_config(config))
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn files(&self) -> &LockedFileStore {
        &self.files
    }

    pub fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    pub fn is_locking_available(&self) -> bool {
        self.files.is_locking_available()
    }

    /// Errors from onchange callbacks are passed here as well as logged.
    pub fn set_error_reporter<F>(&self, reporter: F)
    where
        F: Fn(&StoreError) + Send + Sync + 'static,
    {
        *self.reporter.write() = Some(Arc::new(reporter));
    }

    fn state(&self) -> MutexGuard<'_, OptionsState> {
        // A panic while holding the guard cannot leave the maps half-updated:
        // every critical section is a single insert/remove/swap.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current effective value of `key`.
    pub fn get(&self, key: &str) -> Result<SettingValue, StoreError> {
        let descriptor = self.registry.get(key);
        {
            let state = self.state();
            if let Some(value) = state.values.get(key) {
                return Ok(value.clone());
            }
            if let Some(raw) = state.unknown.get(key) {
                let value = match &descriptor {
                    Some(d) => SettingValue::conform(raw, d.kind()),
                    None => SettingValue::from_json(raw),
                };
                if let Some(value) = value {
                    return Ok(value);
                }
                if descriptor.is_none() {
                    return Err(StoreError::TypeMismatch {
                        key: key.to_string(),
                        expected: ValueKind::Text,
                        found: json_type_name(raw).to_string(),
                    });
                }
            }
        }
        descriptor
            .map(|d| d.default.clone())
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))
    }

    /// Current value of any key as JSON, including unknown keys of any shape.
    pub fn get_raw(&self, key: &str) -> Result<Value, StoreError> {
        if let Some(raw) = self.state().unknown.get(key) {
            if !self.registry.contains(key) {
                return Ok(raw.clone());
            }
        }
        self.get(key).map(|v| v.to_json())
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, StoreError> {
        let value = self.get(key)?;
        value.as_bool().ok_or_else(|| mismatch(key, ValueKind::Bool, &value))
    }

    pub fn get_int(&self, key: &str) -> Result<i64, StoreError> {
        let value = self.get(key)?;
        value.as_int().ok_or_else(|| mismatch(key, ValueKind::Int, &value))
    }

    pub fn get_float(&self, key: &str) -> Result<f64, StoreError> {
        let value = self.get(key)?;
        value.as_float().ok_or_else(|| mismatch(key, ValueKind::Float, &value))
    }

    pub fn get_string(&self, key: &str) -> Result<String, StoreError> {
        match self.get(key)? {
            SettingValue::Text(s) => Ok(s),
            other => Err(mismatch(key, ValueKind::Text, &other)),
        }
    }

    pub fn get_list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.get(key)? {
            SettingValue::List(items) => Ok(items),
            other => Err(mismatch(key, ValueKind::List, &other)),
        }
    }

    pub fn default_of(&self, key: &str) -> Option<SettingValue> {
        self.registry.get(key).map(|d| d.default.clone())
    }

    /// True if a stored value differs from the default.
    pub fn is_overridden(&self, key: &str) -> bool {
        let Some(descriptor) = self.registry.get(key) else {
            return false;
        };
        self.state()
            .values
            .get(key)
            .is_some_and(|v| !v.equivalent(&descriptor.default))
    }

    /// Visible schema keys in registry order.
    pub fn visible_keys(&self) -> Vec<String> {
        self.registry
            .descriptors()
            .iter()
            .filter(|d| d.visible)
            .map(|d| d.key.clone())
            .collect()
    }

    /// Keys held without a schema entry.
    pub fn unknown_keys(&self) -> Vec<String> {
        self.state()
            .unknown
            .keys()
            .filter(|k| !self.registry.contains(k))
            .cloned()
            .collect()
    }

    /// Register an extension's descriptor. A value already loaded for this key
    /// is adopted if it fits the new schema entry.
    pub fn register(&self, descriptor: SettingDescriptor) -> Result<(), StoreError> {
        let _serial = self.mutation.lock();
        let key = descriptor.key.clone();
        let kind = descriptor.kind();
        let check = descriptor.clone();
        self.registry.register(descriptor)?;

        let mut state = self.state();
        if let Some(raw) = state.unknown.remove(&key) {
            match SettingValue::conform(&raw, kind).filter(|v| check.validate(v)) {
                Some(value) => {
                    state.values.insert(key, value);
                }
                None => {
                    metrics::record_validation_failure();
                    tracing::warn!(key = %key, value = %raw, expected = %kind, "Setting validation: stored value replaced by default");
                }
            }
        }
        Ok(())
    }

    /// Change `key`. Returns whether the effective value changed.
    ///
    /// Callbacks run after the value is staged; if any fails the previous
    /// value is restored and the result is `Ok(false)`.
    pub fn set(&self, key: &str, value: impl Into<SettingValue>) -> Result<bool, StoreError> {
        let value = value.into();
        self.policy.check_writable(key)?;

        let _serial = self.mutation.lock();
        let Some(descriptor) = self.registry.get(key) else {
            return self.set_unknown(key, value);
        };

        let found = value.kind();
        let value = value.conform_to(descriptor.kind()).ok_or_else(|| StoreError::TypeMismatch {
            key: key.to_string(),
            expected: descriptor.kind(),
            found: found.to_string(),
        })?;
        if !descriptor.validate(&value) {
            return Err(StoreError::Invalid {
                key: key.to_string(),
                value: value.to_string(),
            });
        }

        let previous = self.stored(key);
        let current = self.get(key)?;
        if current == value {
            return Ok(false);
        }

        if self.policy.debug {
            tracing::trace!(key = %key, value = %value, previous = %current, "Settings set");
        }
        self.stage(key, Some(value.clone()));

        match self.notify(key, &descriptor, &value) {
            Ok(()) => Ok(true),
            Err(message) => {
                self.stage(key, previous);
                self.report(StoreError::Callback {
                    key: key.to_string(),
                    message,
                });
                Ok(false)
            }
        }
    }

    /// Drop the stored value of `key` so it reads as its default again.
    /// Returns whether a stored value was removed.
    pub fn reset(&self, key: &str) -> Result<bool, StoreError> {
        self.policy.check_writable(key)?;

        let _serial = self.mutation.lock();
        let Some(descriptor) = self.registry.get(key) else {
            let removed = self.state().unknown.remove(key).is_some();
            return if removed {
                Ok(true)
            } else {
                Err(StoreError::UnknownKey(key.to_string()))
            };
        };

        let Some(previous) = self.stored(key) else {
            return Ok(false);
        };
        self.stage(key, None);
        if previous == descriptor.default {
            return Ok(true);
        }

        if self.policy.debug {
            tracing::trace!(key = %key, previous = %previous, "Settings reset");
        }
        match self.notify(key, &descriptor, &descriptor.default) {
            Ok(()) => Ok(true),
            Err(message) => {
                self.stage(key, Some(previous));
                self.report(StoreError::Callback {
                    key: key.to_string(),
                    message,
                });
                Ok(false)
            }
        }
    }

    /// Reset every schema key with a stored value. Returns how many were reset.
    pub fn reset_all(&self) -> Result<usize, StoreError> {
        if self.policy.frozen {
            return Err(StoreError::Frozen("reset".to_string()));
        }
        let _serial = self.mutation.lock();
        let keys: Vec<String> = self.state().values.keys().cloned().collect();
        let mut count = 0;
        for key in keys {
            if self.reset(&key)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Coerce `raw` to the kind of `key`'s default.
    pub fn cast_value(&self, key: &str, raw: &Value) -> Result<SettingValue, StoreError> {
        let descriptor = self
            .registry
            .get(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;
        SettingValue::cast(raw, descriptor.kind()).map_err(|source| StoreError::Cast {
            key: key.to_string(),
            source,
        })
    }

    /// Run `callback` whenever `key` changes through [`set`](Self::set) or
    /// [`reset`](Self::reset). With `call_now` it also runs once immediately
    /// with the current value.
    pub fn onchange<F>(&self, key: &str, callback: F, call_now: bool) -> Result<(), StoreError>
    where
        F: Fn(&SettingValue) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        if !self.registry.contains(key) {
            return Err(StoreError::UnknownKey(key.to_string()));
        }
        let callback: OnChange = Arc::new(callback);
        self.listeners
            .entry(key.to_string())
            .or_default()
            .push(Arc::clone(&callback));

        if call_now {
            let current = self.get(key)?;
            if let Err(message) = invoke(&callback, &current) {
                self.report(StoreError::Callback {
                    key: key.to_string(),
                    message,
                });
            }
        }
        Ok(())
    }

    /// Replace the in-memory state with the document at `path`.
    pub fn load(&self, path: &Path) -> LoadReport {
        let mut report = LoadReport::default();
        let mut doc = match self.files.read(path) {
            ReadOutcome::Document(doc) => {
                metrics::record_load("ok");
                doc
            }
            ReadOutcome::NotFound => {
                metrics::record_load("not_found");
                tracing::debug!(path = %path.display(), "Settings file created");
                self.save(path);
                report.created = true;
                return report;
            }
            other => {
                metrics::record_load(other.label());
                tracing::warn!(path = %path.display(), "Settings file unusable, keeping current settings");
                report.failed = true;
                return report;
            }
        };

        self.split_legacy_lists(&mut doc);

        let mut next = OptionsState::default();
        for (key, raw) in doc {
            let Some(descriptor) = self.registry.get(&key) else {
                if !self.policy.is_compatibility(&key) && !self.policy.is_quiet(&key) {
                    report.unknown.push(key.clone());
                }
                if self.policy.debug {
                    tracing::trace!(key = %key, value = %raw, "Settings unknown");
                }
                next.unknown.insert(key, raw);
                report.loaded += 1;
                continue;
            };

            match SettingValue::conform(&raw, descriptor.kind()) {
                Some(value) if descriptor.validate(&value) => {
                    next.values.insert(key, value);
                    report.loaded += 1;
                }
                Some(value) => {
                    metrics::record_validation_failure();
                    tracing::warn!(key = %key, value = %value, "Setting validation: invalid value, using default");
                    report.rejected.push(key);
                }
                None => {
                    metrics::record_validation_failure();
                    tracing::warn!(
                        key = %key,
                        value = %raw,
                        found = json_type_name(&raw),
                        expected = %descriptor.kind(),
                        "Setting validation: wrong type, using default"
                    );
                    report.rejected.push(key);
                }
            }
        }

        if !report.unknown.is_empty() {
            tracing::warn!(unknown = ?report.unknown, "Setting validation: unknown settings kept");
        }

        let _serial = self.mutation.lock();
        let previous = std::mem::replace(&mut *self.state(), next);
        report.changed = self.changed_keys(&previous);
        if self.policy.debug {
            tracing::trace!(path = %path.display(), loaded = report.loaded, changed = ?report.changed, "Settings load");
        }
        report
    }

    /// The minimal document to persist, plus unknown keys worth reporting.
    ///
    /// Taken under the mutation lock, so a value staged for a running
    /// callback is never persisted.
    pub fn diff(&self) -> (Document, Vec<String>) {
        let _serial = self.mutation.lock();
        let state = self.state();
        let mut diff = Document::new();
        let mut unused = Vec::new();

        for (key, value) in &state.values {
            match self.registry.get(key) {
                Some(descriptor) if value.equivalent(&descriptor.default) => {}
                _ => {
                    if self.policy.debug {
                        tracing::trace!(key = %key, value = %value, "Settings changed");
                    }
                    diff.insert(key.clone(), value.to_json());
                }
            }
        }

        for (key, raw) in &state.unknown {
            if self.policy.is_compatibility(key) || state.values.contains_key(key) {
                continue;
            }
            if let Some(descriptor) = self.registry.get(key) {
                let unchanged = SettingValue::conform(raw, descriptor.kind())
                    .is_some_and(|v| v.equivalent(&descriptor.default));
                if !unchanged {
                    diff.insert(key.clone(), raw.clone());
                }
                continue;
            }
            if !self.policy.is_quiet(key) {
                unused.push(key.clone());
            }
            diff.insert(key.clone(), raw.clone());
        }

        (diff, unused)
    }

    /// Write the diff to `path`. Returns false if nothing was written.
    pub fn save(&self, path: &Path) -> bool {
        if self.policy.frozen {
            tracing::warn!(path = %path.display(), "Settings frozen, save disabled");
            return false;
        }

        let _serial = self.mutation.lock();
        let (diff, unused) = self.diff();
        if self.policy.debug {
            tracing::debug!(total = self.state().values.len(), known = self.registry.len(), "Settings save");
        }
        let ok = self.files.write(&diff, path, self.policy.atomic_writes);
        metrics::record_save(ok);
        if ok {
            self.written.insert(path.to_path_buf(), diff);
        }
        if !unused.is_empty() {
            tracing::debug!(unused = ?unused, "Settings unused");
        }
        ok
    }

    /// True if `doc` is exactly what this store last wrote to `path`.
    pub fn is_own_write(&self, path: &Path, doc: &Document) -> bool {
        self.written.get(path).is_some_and(|last| *last == *doc)
    }

    pub fn reorder_by_section(&self) {
        self.registry.reorder_by_section();
    }

    /// Every schema key's effective value with its override flag and section.
    pub fn dump_snapshot(&self) -> Snapshot {
        let _serial = self.mutation.lock();
        let state = self.state();
        let mut snapshot = Snapshot::default();
        for descriptor in self.registry.descriptors() {
            let stored = state.values.get(&descriptor.key);
            let value = stored.unwrap_or(&descriptor.default);
            snapshot.values.insert(descriptor.key.clone(), value.to_json());
            snapshot.metadata.insert(
                descriptor.key.clone(),
                SnapshotMeta {
                    is_overridden: stored.is_some_and(|v| !v.equivalent(&descriptor.default)),
                    section_group: descriptor.section.id.clone(),
                },
            );
        }
        snapshot
    }

    fn set_unknown(&self, key: &str, value: SettingValue) -> Result<bool, StoreError> {
        let mut state = self.state();
        let Some(slot) = state.unknown.get_mut(key) else {
            return Err(StoreError::UnknownKey(key.to_string()));
        };
        let json = value.to_json();
        if *slot == json {
            return Ok(false);
        }
        if self.policy.debug {
            tracing::trace!(key = %key, value = %json, "Settings set unknown");
        }
        *slot = json;
        Ok(true)
    }

    fn stored(&self, key: &str) -> Option<SettingValue> {
        self.state().values.get(key).cloned()
    }

    fn stage(&self, key: &str, value: Option<SettingValue>) {
        let mut state = self.state();
        match value {
            Some(value) => {
                state.values.insert(key.to_string(), value);
            }
            None => {
                state.values.remove(key);
            }
        }
    }

    fn notify(&self, key: &str, descriptor: &SettingDescriptor, value: &SettingValue) -> Result<(), String> {
        let mut callbacks: Vec<OnChange> = descriptor.onchange.iter().cloned().collect();
        if let Some(registered) = self.listeners.get(key) {
            callbacks.extend(registered.iter().cloned());
        }
        for callback in &callbacks {
            invoke(callback, value)?;
        }
        Ok(())
    }

    fn report(&self, error: StoreError) {
        metrics::record_callback_failure();
        tracing::error!(error = %error, "Error in onchange callback");
        let reporter = self.reporter.read().clone();
        if let Some(reporter) = reporter {
            reporter(&error);
        }
    }

    fn split_legacy_lists(&self, doc: &mut Document) {
        for pair in &self.policy.legacy_lists {
            if doc.contains_key(&pair.modern) {
                continue;
            }
            let Some(Value::String(joined)) = doc.get(&pair.legacy) else {
                continue;
            };
            let items = split_list(joined).into_iter().map(Value::String).collect();
            tracing::debug!(legacy = %pair.legacy, modern = %pair.modern, "Settings legacy list converted");
            doc.insert(pair.modern.clone(), Value::Array(items));
        }
    }

    fn changed_keys(&self, previous: &OptionsState) -> Vec<String> {
        let current = self.state();
        let mut keys: Vec<String> = Vec::new();
        for descriptor in self.registry.descriptors() {
            let key = &descriptor.key;
            let before = previous.values.get(key).unwrap_or(&descriptor.default);
            let after = current.values.get(key).unwrap_or(&descriptor.default);
            if before != after {
                keys.push(key.clone());
            }
        }
        let unknown: HashSet<&String> = previous.unknown.keys().chain(current.unknown.keys()).collect();
        let mut unknown: Vec<&String> = unknown.into_iter().collect();
        unknown.sort();
        for key in unknown {
            if previous.unknown.get(key) != current.unknown.get(key) && !self.registry.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }
}

fn invoke(callback: &OnChange, value: &SettingValue) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

fn mismatch(key: &str, expected: ValueKind, value: &SettingValue) -> StoreError {
    StoreError::TypeMismatch {
        key: key.to_string(),
        expected,
        found: value.kind().to_string(),
    }
}
