//! Graceful Shutdown Handling
//!
//! Turns SIGTERM, SIGINT and Ctrl+C into a broadcast that stops the accept
//! loop.

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::Result;

/// Broadcasts a single shutdown request to every subscriber.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Receiver that sees the next shutdown request.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Request shutdown without waiting for a signal.
    pub fn trigger(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("Shutdown requested but nothing is listening");
        }
    }

    /// Resolve once shutdown has been requested.
    ///
    /// Subscribes on call, so a request made before the call is missed.
    pub fn requested(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            // A closed channel also means nobody can ask for shutdown anymore.
            let _ = rx.recv().await;
        }
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C, then broadcast shutdown.
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Listening for shutdown signals");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, draining connections");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, draining connections");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, draining connections");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, draining connections");
        }

        self.trigger();
        Ok(())
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_signal_broadcast() {
        let coordinator = ShutdownCoordinator::new();
        let mut receiver = coordinator.subscribe();

        coordinator.trigger();
        assert!(receiver.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_requested_resolves_after_trigger() {
        let coordinator = ShutdownCoordinator::new();
        let requested = coordinator.requested();

        let trigger = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        tokio::time::timeout(Duration::from_secs(5), requested)
            .await
            .unwrap();
    }
}
