//! Readiness polling for the serving API

use crate::client::OllamaClient;
use std::time::Duration;
use tokio::time::sleep;

/// Outcome of a readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
}

/// Polls the health endpoint until ready or out of attempts
///
/// Fixed interval, no backoff growth. Startup flows treat `TimedOut`
/// as fatal; health flows report it and keep monitoring.
pub struct ReadinessWaiter {
    client: OllamaClient,
    max_attempts: u32,
    interval: Duration,
}

impl ReadinessWaiter {
    pub fn new(client: OllamaClient, max_attempts: u32, interval: Duration) -> Self {
        Self {
            client,
            max_attempts,
            interval,
        }
    }

    /// Poll until one successful probe or `max_attempts` failures
    pub async fn wait_ready(&self) -> Readiness {
        for attempt in 1..=self.max_attempts {
            match self.client.ping().await {
                Ok(()) => {
                    tracing::info!(
                        url = %self.client.base_url(),
                        attempt = attempt,
                        "Service is ready"
                    );
                    return Readiness::Ready;
                }
                Err(e) => {
                    tracing::debug!(
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Readiness probe failed"
                    );
                }
            }

            if attempt < self.max_attempts {
                sleep(self.interval).await;
            }
        }

        tracing::warn!(
            url = %self.client.base_url(),
            attempts = self.max_attempts,
            "Service did not become ready"
        );
        Readiness::TimedOut
    }
}
