//! Shutdown handling for the demo
//!
//! Ctrl+C or SIGTERM cancels every in-flight acquisition; hosts then delete
//! their candidates and close their sessions before the process exits.

use std::future::Future;

use tracing::{info, warn};
use zlock_recipe::CancelSignal;

/// Wait for Ctrl+C or SIGTERM in the background
///
/// Returns the signal that is cancelled when either arrives
pub fn wait_for_shutdown_signal() -> CancelSignal {
    let shutdown = CancelSignal::new();
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, cancelling lock acquisitions...");
            }
            _ = terminate => {
                info!("Received SIGTERM, cancelling lock acquisitions...");
            }
        }

        shutdown_clone.cancel();
    });

    shutdown
}

/// Run a future until it completes or `shutdown` fires
pub async fn run_with_shutdown<F, T>(future: F, shutdown: &CancelSignal) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        result = future => Some(result),
        _ = shutdown.cancelled() => {
            warn!("Shutdown signal received, cancelling operation");
            None
        }
    }
}
