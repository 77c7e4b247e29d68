//! Supervised lifecycle for the wrapped `ollama serve` process

use crate::config::{ManagerConfig, ServerEnv};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Everything needed to spawn the serving process
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub binary_path: String,
    pub model_dir: PathBuf,
    pub log_dir: PathBuf,
    pub env: ServerEnv,
}

/// Opaque handle to a spawned process
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub(crate) id: String,
}

/// Trait for managing process lifecycle
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Spawn the serving process
    async fn spawn(&self, config: SpawnConfig) -> Result<ProcessHandle>;

    /// Stop a process gracefully with timeout
    async fn stop(&self, handle: ProcessHandle, timeout: Duration) -> Result<()>;

    /// Check if process is running
    async fn is_running(&self, handle: &ProcessHandle) -> bool;

    /// Get process ID
    async fn pid(&self, handle: &ProcessHandle) -> Option<u32>;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Production process manager using tokio::process
pub struct SystemProcessManager {
    processes: Arc<RwLock<std::collections::HashMap<String, Child>>>,
}

impl SystemProcessManager {
    pub fn new() -> Self {
        Self {
            processes: Arc::new(RwLock::new(std::collections::HashMap::new())),
        }
    }
}

impl Default for SystemProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessManager for SystemProcessManager {
    async fn spawn(&self, config: SpawnConfig) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&config.binary_path);
        cmd.arg("serve");

        // The serving binary reads its knobs from the environment; the
        // manager passes them through without interpreting them.
        cmd.env("OLLAMA_MODELS", &config.model_dir);
        if let Some(host) = &config.env.host {
            cmd.env("OLLAMA_HOST", host);
        }
        if let Some(keep_alive) = &config.env.keep_alive {
            cmd.env("OLLAMA_KEEP_ALIVE", keep_alive);
        }
        if let Some(max_loaded) = config.env.max_loaded_models {
            cmd.env("OLLAMA_MAX_LOADED_MODELS", max_loaded.to_string());
        }
        if let Some(parallel) = config.env.num_parallel {
            cmd.env("OLLAMA_NUM_PARALLEL", parallel.to_string());
        }

        // Setup log file redirection, falling back to /tmp if the
        // configured log directory cannot be created
        let log_dir = if let Err(e) = std::fs::create_dir_all(&config.log_dir) {
            tracing::warn!(
                error = %e,
                attempted_dir = ?config.log_dir,
                "Failed to create log directory, falling back to /tmp/ollama-manager/logs"
            );
            let fallback = std::path::Path::new("/tmp/ollama-manager/logs");
            std::fs::create_dir_all(fallback).context("Failed to create fallback log directory")?;
            fallback.to_path_buf()
        } else {
            config.log_dir.clone()
        };

        let log_path = log_dir.join("ollama.log");
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file: {:?}", log_path))?;

        let stdout_file = log_file
            .try_clone()
            .context("Failed to clone log file for stdout")?;
        let stderr_file = log_file
            .try_clone()
            .context("Failed to clone log file for stderr")?;

        // Spawn process
        let child = cmd
            .stdout(stdout_file)
            .stderr(stderr_file)
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn serving process")?;

        let pid = child.id().context("Failed to get PID")?;
        let handle_id = format!("process_{}", pid);

        tracing::info!(
            binary = %config.binary_path,
            model_dir = ?config.model_dir,
            pid = pid,
            "Serving process spawned"
        );

        let handle = ProcessHandle {
            id: handle_id.clone(),
        };

        self.processes.write().await.insert(handle_id, child);

        Ok(handle)
    }

    async fn stop(&self, handle: ProcessHandle, timeout: Duration) -> Result<()> {
        let mut processes = self.processes.write().await;

        if let Some(mut child) = processes.remove(&handle.id) {
            // Try graceful shutdown first (SIGTERM)
            if let Some(pid) = child.id() {
                #[cfg(unix)]
                {
                    use nix::sys::signal::{Signal, kill};
                    use nix::unistd::Pid;

                    let pid = Pid::from_raw(pid as i32);
                    let _ = kill(pid, Signal::SIGTERM);

                    // Wait for graceful shutdown with timeout
                    tokio::select! {
                        _ = child.wait() => {
                            tracing::info!("Serving process stopped gracefully");
                        }
                        _ = tokio::time::sleep(timeout) => {
                            tracing::warn!("Graceful shutdown timeout, sending SIGKILL");
                            let _ = kill(pid, Signal::SIGKILL);
                            let _ = child.wait().await;
                        }
                    }
                }

                #[cfg(not(unix))]
                {
                    // On non-Unix, just kill
                    let _ = child.kill().await;
                }
            }
        }

        Ok(())
    }

    async fn is_running(&self, handle: &ProcessHandle) -> bool {
        let processes = self.processes.read().await;
        processes.contains_key(&handle.id)
    }

    async fn pid(&self, handle: &ProcessHandle) -> Option<u32> {
        let processes = self.processes.read().await;
        processes.get(&handle.id).and_then(|p| p.id())
    }
}

// ============================================================================
// Supervised Server Handle
// ============================================================================

/// Server status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Supervised handle to the serving process
///
/// Owned by the orchestrator: explicit start/stop/restart and a
/// join-on-shutdown contract through `stop`.
pub struct OllamaServer {
    spawn_config: SpawnConfig,
    shutdown_timeout: Duration,
    process_manager: Arc<dyn ProcessManager>,
    process_handle: Arc<RwLock<Option<ProcessHandle>>>,
    pub status: Arc<RwLock<ServerStatus>>,
}

impl OllamaServer {
    /// Create a server handle with a custom process manager
    pub fn new_with_manager(config: &ManagerConfig, manager: Arc<dyn ProcessManager>) -> Self {
        Self {
            spawn_config: SpawnConfig {
                binary_path: config.ollama_binary_path.clone(),
                model_dir: config.model_dir.clone(),
                log_dir: config.log_dir.clone(),
                env: config.server_env.clone(),
            },
            shutdown_timeout: Duration::from_secs(config.graceful_shutdown_timeout_secs),
            process_manager: manager,
            process_handle: Arc::new(RwLock::new(None)),
            status: Arc::new(RwLock::new(ServerStatus::Stopped)),
        }
    }

    /// Create a server handle backed by real system processes
    pub fn new(config: &ManagerConfig) -> Self {
        Self::new_with_manager(config, Arc::new(SystemProcessManager::new()))
    }

    /// Start the serving process
    pub async fn start(&self) -> Result<()> {
        let handle = self.process_manager.spawn(self.spawn_config.clone()).await?;
        let pid = self.process_manager.pid(&handle).await;

        *self.process_handle.write().await = Some(handle);
        *self.status.write().await = ServerStatus::Starting;

        tracing::info!(pid = ?pid, "Serving process started");
        Ok(())
    }

    /// Stop the serving process gracefully, joining it before returning
    pub async fn stop(&self) -> Result<()> {
        *self.status.write().await = ServerStatus::Stopping;

        let mut handle_guard = self.process_handle.write().await;

        if let Some(handle) = handle_guard.take() {
            self.process_manager
                .stop(handle, self.shutdown_timeout)
                .await?;

            tracing::info!("Serving process stopped");
        }

        *self.status.write().await = ServerStatus::Stopped;
        Ok(())
    }

    /// Restart the serving process
    pub async fn restart(&self) -> Result<()> {
        tracing::info!("Restarting serving process");

        self.stop().await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        self.start().await?;

        Ok(())
    }

    /// Check if process is still running
    pub async fn is_running(&self) -> bool {
        let handle_guard = self.process_handle.read().await;
        if let Some(handle) = handle_guard.as_ref() {
            self.process_manager.is_running(handle).await
        } else {
            false
        }
    }

    /// Get current PID
    pub async fn pid(&self) -> Option<u32> {
        let handle_guard = self.process_handle.read().await;
        if let Some(handle) = handle_guard.as_ref() {
            self.process_manager.pid(handle).await
        } else {
            None
        }
    }

    /// Mark the process as failed (used by the health monitor)
    pub async fn mark_failed(&self) {
        *self.status.write().await = ServerStatus::Failed;
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::HashMap;

    /// Mock process manager for testing
    pub struct MockProcessManager {
        processes: Arc<RwLock<HashMap<String, ProcessState>>>,
        next_id: Arc<RwLock<u32>>,
    }

    #[derive(Debug, Clone)]
    struct ProcessState {
        pid: u32,
        running: bool,
        config: SpawnConfig,
    }

    impl Default for MockProcessManager {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockProcessManager {
        pub fn new() -> Self {
            Self {
                processes: Arc::new(RwLock::new(HashMap::new())),
                next_id: Arc::new(RwLock::new(1000)),
            }
        }

        /// Get the number of active processes
        pub async fn process_count(&self) -> usize {
            self.processes.read().await.len()
        }

        /// Check whether a process was spawned for a given model dir
        pub async fn was_spawned_for(&self, model_dir: &std::path::Path) -> bool {
            let processes = self.processes.read().await;
            processes
                .values()
                .any(|p| p.config.model_dir == model_dir)
        }
    }

    #[async_trait]
    impl ProcessManager for MockProcessManager {
        async fn spawn(&self, config: SpawnConfig) -> Result<ProcessHandle> {
            let mut next_id = self.next_id.write().await;
            let pid = *next_id;
            *next_id += 1;

            let handle_id = format!("mock_process_{}", pid);
            let handle = ProcessHandle {
                id: handle_id.clone(),
            };

            let state = ProcessState {
                pid,
                running: true,
                config,
            };

            self.processes.write().await.insert(handle_id, state);

            Ok(handle)
        }

        async fn stop(&self, handle: ProcessHandle, _timeout: Duration) -> Result<()> {
            let mut processes = self.processes.write().await;
            processes.remove(&handle.id);
            Ok(())
        }

        async fn is_running(&self, handle: &ProcessHandle) -> bool {
            let processes = self.processes.read().await;
            processes
                .get(&handle.id)
                .map(|p| p.running)
                .unwrap_or(false)
        }

        async fn pid(&self, handle: &ProcessHandle) -> Option<u32> {
            let processes = self.processes.read().await;
            processes.get(&handle.id).map(|p| p.pid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mocks::MockProcessManager;

    fn test_config() -> ManagerConfig {
        ManagerConfig {
            model_dir: PathBuf::from("/tmp/test-models"),
            log_dir: PathBuf::from("/tmp/test-logs"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_server_creation() {
        let manager = Arc::new(MockProcessManager::new());
        let server = OllamaServer::new_with_manager(&test_config(), manager);
        assert_eq!(*server.status.read().await, ServerStatus::Stopped);
        assert!(!server.is_running().await);
    }

    #[tokio::test]
    async fn test_server_start_stop() {
        let manager = Arc::new(MockProcessManager::new());
        let server = OllamaServer::new_with_manager(&test_config(), manager.clone());

        server.start().await.unwrap();
        assert_eq!(*server.status.read().await, ServerStatus::Starting);
        assert!(server.is_running().await);
        assert!(server.pid().await.is_some());
        assert!(
            manager
                .was_spawned_for(std::path::Path::new("/tmp/test-models"))
                .await
        );

        server.stop().await.unwrap();
        assert_eq!(*server.status.read().await, ServerStatus::Stopped);
        assert!(!server.is_running().await);
        assert_eq!(manager.process_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_restart() {
        let manager = Arc::new(MockProcessManager::new());
        let server = OllamaServer::new_with_manager(&test_config(), manager.clone());

        server.start().await.unwrap();
        let first_pid = server.pid().await;

        server.restart().await.unwrap();
        assert!(server.is_running().await);
        assert_ne!(server.pid().await, first_pid);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let manager = Arc::new(MockProcessManager::new());
        let server = OllamaServer::new_with_manager(&test_config(), manager);
        server.stop().await.unwrap();
        assert_eq!(*server.status.read().await, ServerStatus::Stopped);
    }
}
