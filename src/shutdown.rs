use anyhow::Result;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::Workflow;
use crate::observability::operation_metrics;

/// How long the API server gets to finish in-flight requests
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Graceful shutdown coordinator for the installer
///
/// Owns the root cancellation token. The API server stops accepting requests
/// once it is cancelled and controllers derive their step tokens from it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled together with the coordinator
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for SIGINT or SIGTERM, or for a programmatic trigger, then cancel.
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        info!("Shutdown coordinator ready - will shutdown gracefully on SIGINT/SIGTERM");

        tokio::select! {
            result = wait_for_signal() => {
                result?;
                info!("Shutdown signal received");
            }
            _ = self.token.cancelled() => {
                info!("Shutdown triggered");
            }
        }
        self.trigger();
        Ok(())
    }

    /// Perform graceful shutdown operations
    pub async fn shutdown_all_services(
        &self,
        workflow: &Workflow,
        server: JoinHandle<Result<()>>,
    ) -> Result<()> {
        info!("Initiating graceful shutdown of all services...");
        self.trigger();

        // cancel in-flight steps so they settle in their failure states
        workflow.shutdown();

        if let Err(e) = wait_for_server(server).await {
            warn!("API server did not stop cleanly: {}", e);
        }

        operation_metrics().log_stats();
        info!("Graceful shutdown completed successfully");
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// Wait for the API server task to drain
async fn wait_for_server(server: JoinHandle<Result<()>>) -> Result<()> {
    info!("Waiting for API server to finish in-flight requests...");

    let joined = timeout(SERVER_DRAIN_TIMEOUT, server)
        .await
        .map_err(|_| anyhow::anyhow!("Timeout waiting for API server to stop"))?;
    joined??;

    info!("API server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_cancels_children() {
        let coordinator = ShutdownCoordinator::new();
        let child = coordinator.child_token();
        assert!(!coordinator.is_shutting_down());

        coordinator.trigger();
        assert!(coordinator.is_shutting_down());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_returns_after_trigger() {
        let coordinator = ShutdownCoordinator::new();
        let trigger = coordinator.clone();
        tokio::spawn(async move { trigger.trigger() });

        timeout(Duration::from_secs(5), coordinator.wait_for_shutdown())
            .await
            .unwrap()
            .unwrap();
        assert!(coordinator.token().is_cancelled());
    }
}
