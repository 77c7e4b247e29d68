//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main manager configuration
///
/// Built once at startup and passed by reference to each component.
/// The source script variants disagree on retry counts and thresholds,
/// so all of those are configuration here, not constants.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Base URL of the Ollama API
    pub base_url: String,
    /// Model storage directory (opaque tree owned by the serving binary)
    pub model_dir: PathBuf,
    /// Directory holding `*.tar.gz` backups
    pub backup_dir: PathBuf,
    /// Directory for serve-process log files
    pub log_dir: PathBuf,
    /// Marker file written once initial model setup completed
    pub ready_marker: PathBuf,

    /// Ordered model set to install on startup
    pub models: Vec<String>,
    /// Successful installs required before the host counts as ready
    pub min_models_required: usize,
    /// Launch pulls as parallel tasks instead of strictly in order
    pub concurrent_pulls: bool,

    pub pull_max_attempts: u32,
    pub pull_backoff_secs: u64,

    pub readiness_max_attempts: u32,
    pub readiness_interval_secs: u64,
    pub http_timeout_secs: u64,

    /// Keep at most this many backups after pruning
    pub max_backups: usize,

    /// Spawn and supervise `ollama serve` (false when an external
    /// supervisor owns the process)
    pub manage_server: bool,
    pub health_check_interval_secs: u64,
    pub max_failures_before_restart: u32,
    pub auto_restart: bool,
    pub graceful_shutdown_timeout_secs: u64,

    #[serde(default = "default_ollama_binary_path")]
    pub ollama_binary_path: String,

    /// Environment passed through to the wrapped service, never
    /// interpreted here
    pub server_env: ServerEnv,
}

/// Environment knobs consumed by the serving binary itself
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerEnv {
    /// OLLAMA_HOST bind address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// OLLAMA_KEEP_ALIVE duration string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
    /// OLLAMA_MAX_LOADED_MODELS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_loaded_models: Option<u32>,
    /// OLLAMA_NUM_PARALLEL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_parallel: Option<u32>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model_dir: default_model_dir(),
            backup_dir: default_backup_dir(),
            log_dir: default_log_dir(),
            ready_marker: default_ready_marker(),
            models: Vec::new(),
            min_models_required: default_min_models_required(),
            concurrent_pulls: false,
            pull_max_attempts: default_pull_max_attempts(),
            pull_backoff_secs: default_pull_backoff(),
            readiness_max_attempts: default_readiness_max_attempts(),
            readiness_interval_secs: default_readiness_interval(),
            http_timeout_secs: default_http_timeout(),
            max_backups: default_max_backups(),
            manage_server: true,
            health_check_interval_secs: default_health_check_interval(),
            max_failures_before_restart: default_max_failures_before_restart(),
            auto_restart: false,
            graceful_shutdown_timeout_secs: default_graceful_shutdown_timeout(),
            ollama_binary_path: default_ollama_binary_path(),
            server_env: ServerEnv::default(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(url) = std::env::var("OLLAMA_MANAGER_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(dir) = std::env::var("OLLAMA_MANAGER_MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("OLLAMA_MANAGER_BACKUP_DIR") {
            config.backup_dir = PathBuf::from(dir);
        }
        if let Ok(max) = std::env::var("OLLAMA_MANAGER_MAX_BACKUPS") {
            config.max_backups = max
                .parse()
                .context("Invalid OLLAMA_MANAGER_MAX_BACKUPS value")?;
        }
        if let Ok(binary_path) = std::env::var("OLLAMA_BINARY_PATH") {
            config.ollama_binary_path = binary_path;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            anyhow::bail!("base_url cannot be empty");
        }
        if self.pull_max_attempts == 0 {
            anyhow::bail!("pull_max_attempts must be >= 1");
        }
        if self.readiness_max_attempts == 0 {
            anyhow::bail!("readiness_max_attempts must be >= 1");
        }
        if self.max_backups == 0 {
            anyhow::bail!("max_backups must be >= 1");
        }

        for model in &self.models {
            if model.trim().is_empty() {
                anyhow::bail!("model identifiers cannot be empty");
            }
            if model.contains('/') && model.matches('/').count() > 1 {
                anyhow::bail!("model identifier '{}' is not a valid name:tag", model);
            }
        }

        Ok(())
    }

    /// Readiness threshold effective for this run
    ///
    /// Clamped to the declared set size so a two-model host with the
    /// default threshold of three still has an attainable requirement.
    pub fn effective_min_required(&self) -> usize {
        self.min_models_required.min(self.models.len())
    }
}

// Default functions
fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_model_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".ollama/models"))
        .unwrap_or_else(|| PathBuf::from("/data/ollama/models"))
}
fn default_backup_dir() -> PathBuf {
    PathBuf::from("/data/backups")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("/data/logs")
}
fn default_ready_marker() -> PathBuf {
    PathBuf::from("/data/.models-ready")
}
fn default_min_models_required() -> usize {
    3
}
fn default_pull_max_attempts() -> u32 {
    3
}
fn default_pull_backoff() -> u64 {
    10
}
fn default_readiness_max_attempts() -> u32 {
    30
}
fn default_readiness_interval() -> u64 {
    2
}
fn default_http_timeout() -> u64 {
    5
}
fn default_max_backups() -> usize {
    5
}
fn default_health_check_interval() -> u64 {
    30
}
fn default_max_failures_before_restart() -> u32 {
    3
}
fn default_graceful_shutdown_timeout() -> u64 {
    30
}
fn default_ollama_binary_path() -> String {
    "ollama".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:11434");
        assert_eq!(config.pull_max_attempts, 3);
        assert_eq!(config.pull_backoff_secs, 10);
        assert_eq!(config.max_backups, 5);
        assert!(config.manage_server);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = ManagerConfig {
            pull_max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retention_rejected() {
        let config = ManagerConfig {
            max_backups: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_model_id_rejected() {
        let config = ManagerConfig {
            models: vec!["llama3:8b".to_string(), "  ".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_min_clamped_to_set_size() {
        let config = ManagerConfig {
            models: vec!["a:1".to_string(), "b:1".to_string()],
            min_models_required: 3,
            ..Default::default()
        };
        assert_eq!(config.effective_min_required(), 2);
    }

    // Environment variables are process-global, so these run serially.
    #[test]
    #[serial_test::serial]
    fn test_env_overrides() {
        unsafe {
            std::env::set_var("OLLAMA_MANAGER_BASE_URL", "http://10.9.8.7:11434");
            std::env::set_var("OLLAMA_MANAGER_MAX_BACKUPS", "9");
        }
        let config = ManagerConfig::load(None).unwrap();
        unsafe {
            std::env::remove_var("OLLAMA_MANAGER_BASE_URL");
            std::env::remove_var("OLLAMA_MANAGER_MAX_BACKUPS");
        }
        assert_eq!(config.base_url, "http://10.9.8.7:11434");
        assert_eq!(config.max_backups, 9);
    }

    #[test]
    #[serial_test::serial]
    fn test_invalid_env_override_rejected() {
        unsafe {
            std::env::set_var("OLLAMA_MANAGER_MAX_BACKUPS", "many");
        }
        let result = ManagerConfig::load(None);
        unsafe {
            std::env::remove_var("OLLAMA_MANAGER_MAX_BACKUPS");
        }
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            base_url = "http://10.0.0.2:11434"
            models = ["llama3:8b", "phi3:mini"]
            min_models_required = 2
            max_backups = 7

            [server_env]
            keep_alive = "5m"
            max_loaded_models = 2
        "#;
        let config: ManagerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.base_url, "http://10.0.0.2:11434");
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.max_backups, 7);
        assert_eq!(config.server_env.keep_alive.as_deref(), Some("5m"));
        assert_eq!(config.server_env.max_loaded_models, Some(2));
        // Untouched fields fall back to defaults
        assert_eq!(config.pull_max_attempts, 3);
    }
}
