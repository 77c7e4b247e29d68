//! Startup sequencing and supervised shutdown

use crate::client::OllamaClient;
use crate::config::ManagerConfig;
use crate::health::HealthMonitor;
use crate::installer::{CliPuller, InstallationSummary, ModelInstaller};
use crate::readiness::{Readiness, ReadinessWaiter};
use crate::registry::OllamaRegistry;
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use crate::server::OllamaServer;

/// Sequences startup: serve process, readiness, model set installation,
/// readiness marker, then supervision until a termination signal
///
/// Partial installation above the configured minimum degrades with a
/// warning; below it, startup is a hard stop. In-flight pulls are not
/// cancelled on shutdown; only the serving process is stopped and joined.
pub struct LifecycleOrchestrator {
    config: ManagerConfig,
    client: OllamaClient,
    server: Option<Arc<OllamaServer>>,
    installer: Arc<ModelInstaller>,
}

impl LifecycleOrchestrator {
    pub fn new(config: ManagerConfig) -> Result<Self> {
        let client = OllamaClient::new(
            config.base_url.clone(),
            Duration::from_secs(config.http_timeout_secs),
        )?;

        let server = config
            .manage_server
            .then(|| Arc::new(OllamaServer::new(&config)));

        let registry = Arc::new(OllamaRegistry::new(client.clone()));
        let puller = Arc::new(CliPuller::new(config.ollama_binary_path.clone()));
        let installer = Arc::new(ModelInstaller::new(
            puller,
            registry,
            config.pull_max_attempts,
            Duration::from_secs(config.pull_backoff_secs),
        ));

        Ok(Self {
            config,
            client,
            server,
            installer,
        })
    }

    /// Run the full lifecycle until a termination signal arrives
    pub async fn run(&self) -> Result<()> {
        if let Some(server) = &self.server {
            server.start().await.context("Failed to start serving process")?;
        }

        let waiter = ReadinessWaiter::new(
            self.client.clone(),
            self.config.readiness_max_attempts,
            Duration::from_secs(self.config.readiness_interval_secs),
        );

        if waiter.wait_ready().await == Readiness::TimedOut {
            self.stop_server().await;
            anyhow::bail!(
                "service at {} did not become ready",
                self.config.base_url
            );
        }

        let summary = self.install_declared_set().await;

        if !summary.meets_minimum {
            self.stop_server().await;
            anyhow::bail!(
                "only {} of {} models installed, below the minimum of {}",
                summary.succeeded,
                summary.results.len(),
                self.config.effective_min_required()
            );
        }
        if summary.failed > 0 {
            tracing::warn!(
                failed = summary.failed,
                "Proceeding in degraded mode with partial model set"
            );
        }

        write_ready_marker(&self.config.ready_marker)
            .await
            .context("Failed to write ready marker")?;
        tracing::info!(marker = ?self.config.ready_marker, "Initial model setup complete");

        // Supervise until told to stop
        let monitor = Arc::new(HealthMonitor::new(
            self.client.clone(),
            self.server.clone(),
            self.config.health_check_interval_secs,
            self.config.max_failures_before_restart,
            self.config.auto_restart,
        ));
        let monitor_handle = tokio::spawn({
            let monitor = monitor.clone();
            async move {
                monitor.run().await;
            }
        });

        shutdown_signal().await;

        tracing::info!("Shutting down...");
        monitor_handle.abort();
        self.stop_server().await;
        tracing::info!("Shutdown complete");

        Ok(())
    }

    async fn install_declared_set(&self) -> InstallationSummary {
        let min_required = self.config.effective_min_required();
        if self.config.concurrent_pulls {
            self.installer
                .install_set_concurrent(&self.config.models, min_required)
                .await
        } else {
            self.installer
                .install_set(&self.config.models, min_required)
                .await
        }
    }

    async fn stop_server(&self) {
        if let Some(server) = &self.server
            && let Err(e) = server.stop().await
        {
            tracing::error!(error = %e, "Failed to stop serving process");
        }
    }
}

/// Write the sentinel marker signaling completed initial setup
pub async fn write_ready_marker(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, format!("{}\n", Utc::now().to_rfc3339())).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_ready_marker_creates_parents() {
        let temp = tempfile::tempdir().unwrap();
        let marker = temp.path().join("nested/dir/.models-ready");

        write_ready_marker(&marker).await.unwrap();

        let content = std::fs::read_to_string(&marker).unwrap();
        assert!(content.trim().parse::<chrono::DateTime<Utc>>().is_ok());
    }

    #[test]
    fn test_new_without_managed_server() {
        let config = ManagerConfig {
            manage_server: false,
            ..Default::default()
        };
        let orchestrator = LifecycleOrchestrator::new(config).unwrap();
        assert!(orchestrator.server.is_none());
    }
}
