//! `ConfigStore`: the handle consumers receive at startup.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::RecommendedWatcher;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::StoreConfig;
use crate::lifecycle::Shutdown;
use crate::options::{LoadReport, OptionsStore, SchemaRegistry, SettingValue, StoreError};
use crate::persistence::queue::SaveQueue;
use crate::persistence::watcher::{ReloadEvent, SettingsWatcher};

const RELOAD_CHANNEL_CAPACITY: usize = 16;

/// The process's settings: the options store, its file, and its save worker.
///
/// Constructed once and cloned into every consumer. Dereferences to
/// [`OptionsStore`] for reads and writes.
#[derive(Clone)]
pub struct ConfigStore {
    options: Arc<OptionsStore>,
    saver: SaveQueue,
    path: PathBuf,
    reloads: broadcast::Sender<ReloadEvent>,
    watcher: Option<Arc<RecommendedWatcher>>,
}

impl ConfigStore {
    /// Build the store from `config`, load the settings file and start the
    /// save worker. With `config.watch` set, external edits of the file are
    /// reloaded and announced through [`subscribe_reloads`](Self::subscribe_reloads).
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(config: &StoreConfig, registry: SchemaRegistry, shutdown: &Shutdown) -> (Self, LoadReport, JoinHandle<()>) {
        let options = Arc::new(OptionsStore::from_config(registry, config));
        let report = options.load(&config.settings_path);
        tracing::info!(
            path = %config.settings_path.display(),
            loaded = report.loaded,
            rejected = report.rejected.len(),
            unknown = report.unknown.len(),
            locking = options.is_locking_available(),
            "Settings loaded"
        );
        let (mut store, worker) = Self::with_store(options, config.settings_path.clone(), shutdown);
        if config.watch {
            store.start_watching(shutdown);
        }
        (store, report, worker)
    }

    /// Wrap an existing store. Must be called inside a tokio runtime.
    pub fn with_store(options: Arc<OptionsStore>, path: PathBuf, shutdown: &Shutdown) -> (Self, JoinHandle<()>) {
        let (saver, worker) = SaveQueue::spawn(Arc::clone(&options), shutdown);
        let (reloads, _) = broadcast::channel(RELOAD_CHANNEL_CAPACITY);
        (
            Self {
                options,
                saver,
                path,
                reloads,
                watcher: None,
            },
            worker,
        )
    }

    fn start_watching(&mut self, shutdown: &Shutdown) {
        let (watcher, mut updates) = SettingsWatcher::new(&self.path, Arc::clone(&self.options));
        let watcher = match watcher.run() {
            Ok(watcher) => watcher,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Settings watcher failed to start, external edits will not be reloaded");
                return;
            }
        };
        self.watcher = Some(Arc::new(watcher));

        let reloads = self.reloads.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = updates.recv() => match event {
                        Some(event) => {
                            let _ = reloads.send(event);
                        }
                        None => break,
                    },
                    _ = shutdown.wait() => break,
                }
            }
        });
    }

    pub fn options(&self) -> &Arc<OptionsStore> {
        &self.options
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Reloads caused by external edits. Empty unless the store was opened
    /// with `watch` enabled.
    pub fn subscribe_reloads(&self) -> broadcast::Receiver<ReloadEvent> {
        self.reloads.subscribe()
    }

    pub fn load(&self) -> LoadReport {
        self.options.load(&self.path)
    }

    pub fn save(&self) -> bool {
        self.options.save(&self.path)
    }

    /// Schedule a save of the settings file without waiting for it.
    pub fn save_async(&self) {
        self.saver.request(self.path.clone());
    }

    /// Schedule a save to another file without waiting for it.
    pub fn save_async_to(&self, path: impl Into<PathBuf>) {
        self.saver.request(path);
    }

    /// Wait for every save scheduled before this call.
    pub async fn flush(&self) {
        self.saver.flush().await;
    }

    /// `set` followed by a background save when the value changed.
    pub fn set_and_save(&self, key: &str, value: impl Into<SettingValue>) -> Result<bool, StoreError> {
        let changed = self.options.set(key, value)?;
        if changed {
            self.save_async();
        }
        Ok(changed)
    }
}

impl Deref for ConfigStore {
    type Target = OptionsStore;

    fn deref(&self) -> &OptionsStore {
        &self.options
    }
}
