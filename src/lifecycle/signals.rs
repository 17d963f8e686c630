//! OS signal handling: Ctrl-C (SIGINT) triggers the shared [`Shutdown`].

use crate::lifecycle::Shutdown;

/// Spawn a task that triggers `shutdown` on Ctrl-C.
pub fn install(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    tracing::info!("Interrupt received, shutting down");
                    shutdown.trigger();
                }
                Err(e) => {
                    tracing::error!(error = %e, "Unable to listen for interrupt");
                    shutdown.wait().await;
                }
            },
            _ = shutdown.wait() => {}
        }
    })
}
