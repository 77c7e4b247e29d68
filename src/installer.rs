//! Model installation with bounded retries and post-install verification

use crate::error::{ManagerError, ManagerResult};
use crate::registry::ModelCatalog;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::RwLock;

/// Lifecycle state of a declared model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    Absent,
    Pulling,
    Installed,
    Failed,
}

/// Per-model outcome of an install run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    Succeeded,
    Failed,
}

/// Result of installing one model
#[derive(Debug, Clone, Serialize)]
pub struct InstallResult {
    pub model_id: String,
    pub outcome: InstallOutcome,
    pub attempts: u32,
    pub elapsed_secs: f64,
}

/// Aggregate over an ordered model set
#[derive(Debug, Clone, Serialize)]
pub struct InstallationSummary {
    pub results: Vec<InstallResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub meets_minimum: bool,
}

impl InstallationSummary {
    pub fn new(results: Vec<InstallResult>, min_required: usize) -> Self {
        let succeeded = results
            .iter()
            .filter(|r| r.outcome == InstallOutcome::Succeeded)
            .count();
        let failed = results.len() - succeeded;
        Self {
            results,
            succeeded,
            failed,
            meets_minimum: succeeded >= min_required,
        }
    }
}

/// Seam for the external pull operation
#[async_trait]
pub trait ModelPuller: Send + Sync {
    async fn pull(&self, model_id: &str) -> ManagerResult<()>;
}

/// Pulls models by invoking the external `ollama pull` CLI
pub struct CliPuller {
    binary_path: String,
}

impl CliPuller {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl ModelPuller for CliPuller {
    async fn pull(&self, model_id: &str) -> ManagerResult<()> {
        let output = Command::new(&self.binary_path)
            .arg("pull")
            .arg(model_id)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ManagerError::pull_failed(model_id, e))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr
            .lines()
            .last()
            .unwrap_or("pull exited nonzero")
            .to_string();
        Err(ManagerError::pull_failed(model_id, reason))
    }
}

/// Installs declared models with a strict per-model retry sequence
///
/// Pull success alone is not enough: the model must be listed by the
/// catalog afterwards, guarding against partial or corrupt writes.
pub struct ModelInstaller {
    puller: Arc<dyn ModelPuller>,
    catalog: Arc<dyn ModelCatalog>,
    max_attempts: u32,
    backoff: Duration,
    states: Arc<RwLock<HashMap<String, InstallState>>>,
}

impl ModelInstaller {
    pub fn new(
        puller: Arc<dyn ModelPuller>,
        catalog: Arc<dyn ModelCatalog>,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            puller,
            catalog,
            max_attempts,
            backoff,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Current lifecycle state of a model, if it was ever declared
    pub async fn state_of(&self, model_id: &str) -> Option<InstallState> {
        self.states.read().await.get(model_id).copied()
    }

    async fn set_state(&self, model_id: &str, state: InstallState) {
        self.states
            .write()
            .await
            .insert(model_id.to_string(), state);
    }

    /// Install one model: up to `max_attempts` pull+verify rounds with a
    /// fixed backoff between attempts
    pub async fn install(&self, model_id: &str) -> InstallResult {
        let started = Instant::now();
        self.set_state(model_id, InstallState::Absent).await;

        for attempt in 1..=self.max_attempts {
            self.set_state(model_id, InstallState::Pulling).await;
            tracing::info!(
                model = %model_id,
                attempt = attempt,
                max_attempts = self.max_attempts,
                "Pulling model"
            );

            match self.puller.pull(model_id).await {
                Ok(()) => {
                    if self.catalog.verify(model_id).await {
                        self.set_state(model_id, InstallState::Installed).await;
                        tracing::info!(
                            model = %model_id,
                            attempts = attempt,
                            elapsed_secs = started.elapsed().as_secs_f64(),
                            "Model installed"
                        );
                        return InstallResult {
                            model_id: model_id.to_string(),
                            outcome: InstallOutcome::Succeeded,
                            attempts: attempt,
                            elapsed_secs: started.elapsed().as_secs_f64(),
                        };
                    }
                    // Treated exactly like a failed pull
                    let err = ManagerError::VerificationFailed {
                        model_id: model_id.to_string(),
                    };
                    tracing::warn!(
                        model = %model_id,
                        attempt = attempt,
                        "{err}: pull reported success but model is not listed"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        model = %model_id,
                        attempt = attempt,
                        error = %e,
                        "Pull failed"
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }

        self.set_state(model_id, InstallState::Failed).await;
        tracing::error!(
            model = %model_id,
            attempts = self.max_attempts,
            "Model install exhausted all attempts"
        );
        InstallResult {
            model_id: model_id.to_string(),
            outcome: InstallOutcome::Failed,
            attempts: self.max_attempts,
            elapsed_secs: started.elapsed().as_secs_f64(),
        }
    }

    /// Install a declared set in order, accumulating results
    ///
    /// Order determines reporting, not correctness. The caller decides
    /// what to do with a summary that misses the minimum.
    pub async fn install_set(&self, model_ids: &[String], min_required: usize) -> InstallationSummary {
        let mut results = Vec::with_capacity(model_ids.len());
        for model_id in model_ids {
            results.push(self.install(model_id).await);
        }
        self.summarize(results, min_required)
    }

    /// Variant launching every pull as a parallel task
    ///
    /// Results are reported in declared order. Disk space is a shared,
    /// unmanaged resource here; callers accept that concurrent large
    /// pulls can exhaust it.
    pub async fn install_set_concurrent(
        self: &Arc<Self>,
        model_ids: &[String],
        min_required: usize,
    ) -> InstallationSummary {
        let mut handles = Vec::with_capacity(model_ids.len());
        for model_id in model_ids {
            let installer = Arc::clone(self);
            let model_id = model_id.clone();
            handles.push(tokio::spawn(
                async move { installer.install(&model_id).await },
            ));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (handle, model_id) in handles.into_iter().zip(model_ids) {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!(model = %model_id, error = %e, "Install task panicked");
                    results.push(InstallResult {
                        model_id: model_id.clone(),
                        outcome: InstallOutcome::Failed,
                        attempts: 0,
                        elapsed_secs: 0.0,
                    });
                }
            }
        }
        self.summarize(results, min_required)
    }

    fn summarize(&self, results: Vec<InstallResult>, min_required: usize) -> InstallationSummary {
        let summary = InstallationSummary::new(results, min_required);
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            min_required = min_required,
            meets_minimum = summary.meets_minimum,
            "Installation summary"
        );
        summary
    }
}
