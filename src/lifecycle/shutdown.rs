//! Graceful Shutdown Handler
//!
//! Stops a running activator when the process receives SIGTERM or SIGINT.

use super::{Activator, ActivatorStrategy};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Mutex;

/// Handles graceful shutdown of a running activator
///
/// # Example
///
/// ```rust,ignore
/// use trellis::lifecycle::{Activator, ShutdownHandler};
///
/// let activator = Arc::new(Mutex::new(activator));
/// let shutdown_handler = ShutdownHandler::new(Arc::clone(&activator));
///
/// tokio::spawn(async move {
///     shutdown_handler.wait_for_shutdown().await;
/// });
/// ```
pub struct ShutdownHandler {
    activator: Arc<Mutex<Activator>>,
}

impl ShutdownHandler {
    pub fn new(activator: Arc<Mutex<Activator>>) -> Self {
        Self { activator }
    }

    /// Wait for a shutdown signal, then stop the activator
    pub async fn wait_for_shutdown(&self) {
        shutdown_signal().await;
        self.shutdown().await;
    }

    /// Stop the activator, destroying every live container
    pub async fn shutdown(&self) {
        tracing::info!("Starting graceful shutdown...");

        let mut activator = self.activator.lock().await;
        if !activator.is_running() {
            tracing::debug!("Activator not running, nothing to stop");
            return;
        }
        if let Err(e) = activator.stop().await {
            tracing::error!("Error while stopping activator: {}", e);
        }

        tracing::info!("Graceful shutdown complete");
    }
}

/// Create a future that completes when a shutdown signal is received
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
