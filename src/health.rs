//! Health monitoring for the serving process and aggregate health checks

use crate::backup::available_space;
use crate::client::OllamaClient;
use crate::config::ManagerConfig;
use crate::server::OllamaServer;
use crate::server::ServerStatus;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, interval, sleep};

/// Periodic health monitor with optional auto-restart
///
/// Probe failures are reported and monitoring continues; they are never
/// fatal on this path.
pub struct HealthMonitor {
    client: OllamaClient,
    server: Option<Arc<OllamaServer>>,
    check_interval: Duration,
    initial_delay: Duration,
    max_failures_before_restart: u32,
    auto_restart: bool,
    consecutive_failures: AtomicU32,
}

impl HealthMonitor {
    pub fn new(
        client: OllamaClient,
        server: Option<Arc<OllamaServer>>,
        check_interval_secs: u64,
        max_failures_before_restart: u32,
        auto_restart: bool,
    ) -> Self {
        Self {
            client,
            server,
            check_interval: Duration::from_secs(check_interval_secs),
            initial_delay: Duration::from_secs(check_interval_secs.min(10)),
            max_failures_before_restart,
            auto_restart,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Start monitoring loop
    pub async fn run(self: Arc<Self>) {
        // Give the service time to settle before the first probe
        sleep(self.initial_delay).await;

        let mut ticker = interval(self.check_interval);

        tracing::info!(
            interval_secs = self.check_interval.as_secs(),
            "Health monitoring started"
        );

        loop {
            ticker.tick().await;
            self.check_once().await;
        }
    }

    async fn check_once(&self) {
        match self.client.ping().await {
            Ok(()) => self.handle_success().await,
            Err(e) => {
                tracing::warn!(error = %e, "Health check failed, service unhealthy");
                self.handle_failure().await;
            }
        }
    }

    async fn handle_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if let Some(server) = &self.server {
            let mut status = server.status.write().await;
            if *status == ServerStatus::Starting {
                tracing::info!("Serving process is now healthy");
                *status = ServerStatus::Running;
            }
        }
    }

    async fn handle_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

        tracing::warn!(
            failures = failures,
            max_failures = self.max_failures_before_restart,
            "Consecutive health check failures"
        );

        if self.auto_restart
            && failures >= self.max_failures_before_restart
            && let Some(server) = &self.server
        {
            tracing::warn!("Maximum failures reached, attempting restart");
            self.consecutive_failures.store(0, Ordering::Relaxed);

            if let Err(e) = server.restart().await {
                tracing::error!(error = %e, "Failed to restart serving process");
                server.mark_failed().await;
            }
        }
    }
}

/// Point-in-time aggregate health view
///
/// Core checks are API reachability and model directory presence; the
/// rest is informational.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub api_reachable: bool,
    pub model_count: Option<usize>,
    pub model_dir_exists: bool,
    pub available_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoke_ok: Option<bool>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.api_reachable && self.model_dir_exists
    }
}

/// Gather a health report; with `smoke` set, also run an inference smoke
/// test against the first installed model
pub async fn gather_report(
    config: &ManagerConfig,
    client: &OllamaClient,
    smoke: bool,
) -> HealthReport {
    let models = match client.list_models().await {
        Ok(models) => Some(models),
        Err(e) => {
            tracing::warn!(error = %e, "Model listing unavailable for health report");
            None
        }
    };

    let smoke_ok = if smoke {
        match models.as_deref().and_then(|m| m.first()) {
            Some(model) => match client.smoke_test(&model.name).await {
                Ok(()) => Some(true),
                Err(e) => {
                    tracing::warn!(model = %model.name, error = %e, "Smoke test failed");
                    Some(false)
                }
            },
            None => None,
        }
    } else {
        None
    };

    HealthReport {
        api_reachable: models.is_some(),
        model_count: models.as_ref().map(|m| m.len()),
        model_dir_exists: config.model_dir.is_dir(),
        available_bytes: available_space(&config.backup_dir),
        smoke_ok,
    }
}
