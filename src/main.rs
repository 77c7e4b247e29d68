//! Ollama Manager - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ollama_manager::backup::{ArchiveManager, human_bytes};
use ollama_manager::config::ManagerConfig;
use ollama_manager::installer::{CliPuller, InstallOutcome, ModelInstaller};
use ollama_manager::registry::OllamaRegistry;
use ollama_manager::{LifecycleOrchestrator, OllamaClient, health, logging};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ollama-manager")]
#[command(about = "Ollama model lifecycle and backup manager", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,

    /// Persistent operation log (defaults to <log_dir>/manager.log)
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the serving process and supervise it until terminated
    Serve,
    /// List installed models
    List,
    /// Show backup and storage status
    Status,
    /// Pull a model and verify it appears in the listing
    Install {
        /// Model identifier (name or name:tag)
        model: String,
    },
    /// Remove an installed model
    Remove {
        /// Model identifier (name or name:tag)
        model: String,
    },
    /// Unload every model currently held in memory
    Optimize,
    /// Remove stale restore artifacts and prune old backups
    Cleanup,
    /// Create a backup of the model storage directory
    Backup {
        /// Optional name prefix for the archive
        name: Option<String>,
    },
    /// Re-pull a model to pick up a newer version
    Update {
        /// Model identifier (name or name:tag)
        model: String,
    },
    /// Print an aggregate health report
    Health,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Configuration comes first: the persistent log lives under log_dir
    let config = ManagerConfig::load(cli.config)?;
    config.validate()?;

    let log_path = cli
        .log_file
        .unwrap_or_else(|| config.log_dir.join("manager.log"));
    logging::init(&cli.log_level, &cli.log_format, Some(&log_path));

    let client = OllamaClient::new(
        config.base_url.clone(),
        Duration::from_secs(config.http_timeout_secs),
    )?;

    match cli.command {
        Command::Serve => {
            tracing::info!(
                base_url = %config.base_url,
                model_dir = ?config.model_dir,
                models = config.models.len(),
                "Starting Ollama Manager"
            );
            let orchestrator = LifecycleOrchestrator::new(config)?;
            orchestrator.run().await?;
            Ok(ExitCode::SUCCESS)
        }

        Command::List => {
            let models = client
                .list_models()
                .await
                .context("Failed to list models")?;
            if models.is_empty() {
                println!("No models installed");
                return Ok(ExitCode::SUCCESS);
            }
            println!("{:<42} {:>10}  {}", "MODEL", "SIZE", "MODIFIED");
            for model in &models {
                let modified = model
                    .modified_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<42} {:>10}  {}",
                    model.name,
                    human_bytes(model.size),
                    modified
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Status => {
            let archive = ArchiveManager::from_config(&config, Some(Arc::new(client)));
            let status = archive.status().await?;
            println!("Service reachable:  {}", yes_no(status.service_reachable));
            println!("Backups:            {}", status.backup_count);
            println!(
                "Latest backup:      {}",
                status.latest_backup.as_deref().unwrap_or("-")
            );
            println!(
                "Backup dir usage:   {}",
                human_bytes(status.backup_dir_bytes)
            );
            println!(
                "Model dir usage:    {}",
                human_bytes(status.model_dir_bytes)
            );
            println!(
                "Free space:         {}",
                status
                    .available_bytes
                    .map(human_bytes)
                    .unwrap_or_else(|| "unknown".to_string())
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Install { model } | Command::Update { model } => {
            let installer = build_installer(&config, &client);
            let result = installer.install(&model).await;
            match result.outcome {
                InstallOutcome::Succeeded => {
                    println!(
                        "Installed {} ({} attempt(s), {:.1}s)",
                        result.model_id, result.attempts, result.elapsed_secs
                    );
                    Ok(ExitCode::SUCCESS)
                }
                InstallOutcome::Failed => {
                    eprintln!(
                        "Failed to install {} after {} attempt(s)",
                        result.model_id, result.attempts
                    );
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Command::Remove { model } => {
            client
                .delete_model(&model)
                .await
                .with_context(|| format!("Failed to remove model '{model}'"))?;
            println!("Removed {model}");
            Ok(ExitCode::SUCCESS)
        }

        Command::Optimize => {
            let loaded = client
                .loaded_models()
                .await
                .context("Failed to list loaded models")?;
            if loaded.is_empty() {
                println!("No models loaded");
                return Ok(ExitCode::SUCCESS);
            }
            let mut failed = 0;
            for model in &loaded {
                match client.unload_model(&model.name).await {
                    Ok(()) => println!(
                        "Unloaded {} (freed {})",
                        model.name,
                        human_bytes(model.size_vram)
                    ),
                    Err(e) => {
                        tracing::warn!(model = %model.name, error = %e, "Failed to unload model");
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                eprintln!("{failed} model(s) could not be unloaded");
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Cleanup => {
            let archive = ArchiveManager::from_config(&config, Some(Arc::new(client)));
            let removed = archive.cleanup().await?;
            println!("Removed {removed} stale item(s)");
            Ok(ExitCode::SUCCESS)
        }

        Command::Backup { name } => {
            let archive = ArchiveManager::from_config(&config, Some(Arc::new(client)));
            let backup = archive.create(name.as_deref()).await?;
            println!(
                "Created {} ({})",
                backup.path.display(),
                human_bytes(backup.size_bytes)
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Health => {
            let report = health::gather_report(&config, &client, true).await;
            print_health(&report);
            if report.healthy() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn build_installer(config: &ManagerConfig, client: &OllamaClient) -> ModelInstaller {
    let registry = Arc::new(OllamaRegistry::new(client.clone()));
    let puller = Arc::new(CliPuller::new(config.ollama_binary_path.clone()));
    ModelInstaller::new(
        puller,
        registry,
        config.pull_max_attempts,
        Duration::from_secs(config.pull_backoff_secs),
    )
}

fn print_health(report: &ollama_manager::HealthReport) {
    println!("API reachable:     {}", yes_no(report.api_reachable));
    println!(
        "Installed models:  {}",
        report
            .model_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!("Model directory:   {}", yes_no(report.model_dir_exists));
    println!(
        "Free space:        {}",
        report
            .available_bytes
            .map(human_bytes)
            .unwrap_or_else(|| "unknown".to_string())
    );
    if let Some(smoke_ok) = report.smoke_ok {
        println!("Smoke test:        {}", if smoke_ok { "ok" } else { "failed" });
    }
    println!(
        "Overall:           {}",
        if report.healthy() { "healthy" } else { "unhealthy" }
    );
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
