//! Standalone backup and restore CLI sharing the manager library
//!
//! Exits 0 on success and 1 on any handled failure, so it slots into
//! cron jobs and shell pipelines.

use anyhow::Result;
use clap::{Parser, Subcommand};
use ollama_manager::backup::{ArchiveManager, RestoreOutcome, human_bytes};
use ollama_manager::config::ManagerConfig;
use ollama_manager::{OllamaClient, logging};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "backup-tool")]
#[command(about = "Backup and restore for the Ollama model directory", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Persistent operation log (defaults to <log_dir>/backup.log)
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new backup of the model directory
    Backup {
        /// Optional name prefix for the archive
        name: Option<String>,
    },
    /// Restore a backup into the model directory
    Restore {
        /// Archive path, absolute or relative to the backup directory
        file: PathBuf,
        /// Proceed even while models are loaded in memory
        #[arg(long)]
        force: bool,
    },
    /// List available backups, oldest first
    List,
    /// Show backup and storage status
    Status,
    /// Verify archive integrity without restoring
    Verify {
        /// Archive path, absolute or relative to the backup directory
        file: PathBuf,
    },
    /// Prune backups beyond the retention limit
    Clean,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = ManagerConfig::load(cli.config)?;
    config.validate()?;

    let log_path = cli
        .log_file
        .unwrap_or_else(|| config.log_dir.join("backup.log"));
    logging::init(&cli.log_level, "pretty", Some(&log_path));

    let client = OllamaClient::new(
        config.base_url.clone(),
        Duration::from_secs(config.http_timeout_secs),
    )?;
    let archive = ArchiveManager::from_config(&config, Some(Arc::new(client)));

    match cli.command {
        Command::Backup { name } => {
            let backup = archive.create(name.as_deref()).await?;
            println!(
                "Created {} ({})",
                backup.path.display(),
                human_bytes(backup.size_bytes)
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Restore { file, force } => match archive.restore(&file, force).await? {
            RestoreOutcome::Restored => {
                println!("Restored {}", file.display());
                Ok(ExitCode::SUCCESS)
            }
            RestoreOutcome::Aborted { reason } => {
                eprintln!("Restore aborted: {reason}");
                Ok(ExitCode::FAILURE)
            }
            RestoreOutcome::Failed { reason } => {
                eprintln!("Restore failed: {reason}");
                Ok(ExitCode::FAILURE)
            }
        },

        Command::List => {
            let backups = archive.list().await?;
            if backups.is_empty() {
                println!("No backups found");
                return Ok(ExitCode::SUCCESS);
            }
            println!("{:<40} {:>10}  {}", "BACKUP", "SIZE", "CREATED");
            for backup in &backups {
                println!(
                    "{:<40} {:>10}  {}",
                    backup.id,
                    human_bytes(backup.size_bytes),
                    backup.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Status => {
            let status = archive.status().await?;
            println!("Service reachable:  {}", if status.service_reachable { "yes" } else { "no" });
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

        Command::Verify { file } => {
            let verification = archive.verify(&file, false).await;
            for check in &verification.checks {
                let mark = if check.passed {
                    "ok  "
                } else if check.advisory {
                    "warn"
                } else {
                    "FAIL"
                };
                match &check.detail {
                    Some(detail) => println!("[{mark}] {:<16} {detail}", check.name),
                    None => println!("[{mark}] {}", check.name),
                }
            }
            match verification.invalid_reason {
                None => {
                    println!("{}: valid", file.display());
                    Ok(ExitCode::SUCCESS)
                }
                Some(reason) => {
                    eprintln!("{}: invalid ({reason})", file.display());
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Command::Clean => {
            let pruned = archive.clean().await?;
            println!("Pruned {pruned} backup(s)");
            Ok(ExitCode::SUCCESS)
        }
    }
}
