//! Graceful Shutdown Handling
//!
//! Waits for SIGTERM / SIGINT, then stops the link manager and gives its
//! workers a bounded amount of time to release their streams and endpoints.

use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Shutdown timeout duration
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast the shutdown signal without waiting for an OS signal
    pub fn trigger(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("No components subscribed to shutdown signal");
        }
    }

    /// Start listening for shutdown signals (SIGTERM, SIGINT)
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Stop the link manager and wait for its workers to exit
    pub async fn shutdown_connection_manager(&self, manager: &ConnectionManager) -> Result<()> {
        info!("Initiating graceful shutdown of link manager");

        manager.shutdown(self.timeout).await?;

        let stats = manager.stats();
        info!(
            sessions = stats.sessions_established,
            dial_failures = stats.dial_failures,
            connections_lost = stats.connections_lost,
            "Link manager stopped"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::event;
    use crate::protocol::Role;
    use crate::transport::MemoryTransport;

    #[tokio::test]
    async fn test_shutdown_signal_broadcast() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut receiver = coordinator.subscribe();

        coordinator.trigger();

        assert!(receiver.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_stops_manager() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let (events, _rx) = event::channel();
        let manager = ConnectionManager::new(
            Arc::new(Config::default()),
            Arc::new(MemoryTransport::new()),
            Arc::new(events),
        );
        manager.start();

        let started = tokio::time::Instant::now();
        coordinator
            .shutdown_connection_manager(&manager)
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(manager.role(), Role::Idle);
        assert!(manager.workers().listeners.is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_stops_on_trigger() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let mut shutdown = coordinator.subscribe();

        let worker = tokio::spawn(async move {
            let mut ticks = 0u32;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break ticks,
                    _ = tokio::time::sleep(Duration::from_millis(5)) => ticks += 1,
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.trigger();

        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
    }
}
