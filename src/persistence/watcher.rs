//! Settings file watcher for edits made outside this process.
//!
//! A file whose content is exactly what the store last saved there is not
//! reloaded. An external edit that happens to restore that content is
//! therefore missed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::options::{LoadReport, OptionsStore};
use crate::storage::ReadOutcome;

/// Sent after a reload that changed at least one effective value.
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    pub path: PathBuf,
    pub report: LoadReport,
}

/// Reloads the store when its settings file changes on disk.
pub struct SettingsWatcher {
    path: PathBuf,
    store: Arc<OptionsStore>,
    update_tx: mpsc::UnboundedSender<ReloadEvent>,
}

impl SettingsWatcher {
    /// Returns the watcher and a receiver for reload notifications.
    pub fn new(path: &Path, store: Arc<OptionsStore>) -> (Self, mpsc::UnboundedReceiver<ReloadEvent>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                store,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    ///
    /// The parent directory is watched rather than the file, since atomic
    /// saves replace the file's inode.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();
        let store = Arc::clone(&self.store);
        let file_name = self.path.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if !ours || !path.exists() {
                        return;
                    }
                    // Own saves echo back as events.
                    if let ReadOutcome::Document(doc) = store.files().read(&path) {
                        if store.is_own_write(&path, &doc) {
                            tracing::trace!(path = %path.display(), "Settings file event from own save, ignored");
                            return;
                        }
                    }

                    let report = store.load(&path);
                    if report.failed {
                        tracing::error!(path = %path.display(), "Failed to reload settings, keeping current values");
                    } else if !report.changed.is_empty() {
                        tracing::info!(path = %path.display(), changed = ?report.changed, "Settings file changed, reloaded");
                        let _ = tx.send(ReloadEvent {
                            path: path.clone(),
                            report,
                        });
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Settings watcher started");
        Ok(watcher)
    }
}
