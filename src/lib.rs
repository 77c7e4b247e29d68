//! Ollama Manager - model lifecycle and backup manager
//!
//! A lightweight Rust service that supervises an Ollama serving process,
//! installs a declared model set with bounded retries, and manages
//! compressed backups of the model storage directory.

pub mod backup;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod installer;
pub mod logging;
pub mod orchestrator;
pub mod readiness;
pub mod registry;
pub mod server;

pub use backup::{ArchiveManager, Backup, BackupMetadata, RestoreOutcome, StatusReport};
pub use client::{ModelInfo, OllamaClient};
pub use config::ManagerConfig;
pub use error::{ManagerError, ManagerResult};
pub use health::{HealthMonitor, HealthReport};
pub use installer::{InstallOutcome, InstallResult, InstallationSummary, ModelInstaller, ModelPuller};
pub use orchestrator::LifecycleOrchestrator;
pub use readiness::{Readiness, ReadinessWaiter};
pub use registry::{ModelCatalog, OllamaRegistry};
pub use server::{OllamaServer, ServerStatus};
