//! Background save queue.
//!
//! # Responsibilities
//! - Accept save requests from any thread without blocking
//! - Coalesce bursts: a path already waiting is not queued twice
//! - Let callers wait for every save requested so far
//!
//! # Design Decisions
//! - One worker task; saves run on the blocking pool so file locks and fsync
//!   never stall the runtime
//! - Request counting and the close check happen under the pending-set
//!   lock, so the worker's snapshot of the count matches the paths it takes
//! - After shutdown the worker drains what is pending and exits; later
//!   requests are saved inline

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::options::OptionsStore;

struct QueueInner {
    pending: Mutex<BTreeSet<PathBuf>>,
    notify: Notify,
    requested: AtomicU64,
    completed: watch::Sender<u64>,
    closed: AtomicBool,
}

impl QueueInner {
    fn pending(&self) -> MutexGuard<'_, BTreeSet<PathBuf>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the close flag under the pending lock so no request slips between
    /// the check and the insert.
    fn close(&self) {
        let _pending = self.pending();
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Handle to the save worker. Cheap to clone.
#[derive(Clone)]
pub struct SaveQueue {
    inner: Arc<QueueInner>,
    store: Arc<OptionsStore>,
}

impl SaveQueue {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(store: Arc<OptionsStore>, shutdown: &Shutdown) -> (Self, JoinHandle<()>) {
        let (completed, _) = watch::channel(0u64);
        let inner = Arc::new(QueueInner {
            pending: Mutex::new(BTreeSet::new()),
            notify: Notify::new(),
            requested: AtomicU64::new(0),
            completed,
            closed: AtomicBool::new(false),
        });

        let worker = tokio::spawn(run(Arc::clone(&inner), Arc::clone(&store), shutdown.clone()));
        (Self { inner, store }, worker)
    }

    /// Queue a save of the store to `path` and return immediately.
    pub fn request(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        {
            let mut pending = self.inner.pending();
            if !self.inner.closed.load(Ordering::SeqCst) {
                if !pending.insert(path) {
                    metrics::record_save_coalesced();
                }
                self.inner.requested.fetch_add(1, Ordering::SeqCst);
                drop(pending);
                self.inner.notify.notify_one();
                return;
            }
        }

        tracing::debug!(path = %path.display(), "Save queue closed, saving inline");
        self.store.save(&path);
    }

    /// Wait until every save requested before this call has finished.
    pub async fn flush(&self) {
        // Every counted request lands in a drain, the final one included.
        let target = self.inner.requested.load(Ordering::SeqCst);
        let mut rx = self.inner.completed.subscribe();
        let _ = rx.wait_for(|done| *done >= target).await;
    }

    /// Paths waiting for the worker.
    pub fn pending(&self) -> usize {
        self.inner.pending().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

async fn run(inner: Arc<QueueInner>, store: Arc<OptionsStore>, shutdown: Shutdown) {
    let mut stop = shutdown.subscribe();
    loop {
        let stopping = shutdown.is_triggered()
            || tokio::select! {
                _ = inner.notify.notified() => false,
                _ = stop.recv() => true,
            };

        drain(&inner, &store).await;
        if stopping {
            break;
        }
    }

    inner.close();
    // Requests queued between the last drain and the close flag.
    drain(&inner, &store).await;
    tracing::debug!("Save queue stopped");
}

async fn drain(inner: &QueueInner, store: &Arc<OptionsStore>) {
    let (generation, paths) = {
        let mut pending = inner.pending();
        (inner.requested.load(Ordering::SeqCst), std::mem::take(&mut *pending))
    };

    for path in paths {
        let store = Arc::clone(store);
        let target = path.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || store.save(&target)).await {
            tracing::error!(path = %path.display(), error = %e, "Background save failed");
        }
    }

    inner.completed.send_if_modified(|done| {
        if generation > *done {
            *done = generation;
            true
        } else {
            false
        }
    });
}
