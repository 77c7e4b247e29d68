//! Container-friendly health probe
//!
//! Prints a short report and exits 0 when the service is healthy,
//! 1 otherwise, so it can back a Docker HEALTHCHECK directly.

use anyhow::Result;
use clap::Parser;
use ollama_manager::backup::human_bytes;
use ollama_manager::config::ManagerConfig;
use ollama_manager::{OllamaClient, health, logging};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "health-check")]
#[command(about = "Exit-code health probe for the managed Ollama service", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also run an inference smoke test against the first installed model
    #[arg(long)]
    smoke: bool,

    /// Persistent operation log (defaults to <log_dir>/health.log)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = ManagerConfig::load(cli.config)?;
    config.validate()?;

    let log_path = cli
        .log_file
        .unwrap_or_else(|| config.log_dir.join("health.log"));
    logging::init("info", "pretty", Some(&log_path));

    let client = OllamaClient::new(
        config.base_url.clone(),
        Duration::from_secs(config.http_timeout_secs),
    )?;

    let report = health::gather_report(&config, &client, cli.smoke).await;

    tracing::info!(
        healthy = report.healthy(),
        api_reachable = report.api_reachable,
        model_count = ?report.model_count,
        "Health check complete"
    );

    println!("API reachable:     {}", report.api_reachable);
    println!(
        "Installed models:  {}",
        report
            .model_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!("Model directory:   {}", report.model_dir_exists);
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

    if report.healthy() {
        println!("healthy");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("unhealthy");
        Ok(ExitCode::FAILURE)
    }
}
