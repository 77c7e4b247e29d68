//! Logging initialization shared by the binaries
//!
//! Every operation logs through `tracing`. Besides the stdout layer, a
//! JSON line log is appended to a persistent file so runs leave an
//! audit trail that survives the process.

use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Install the global subscriber
///
/// A log file that cannot be opened degrades to stdout-only logging;
/// it never blocks the operation itself.
pub fn init(level: &str, format: &str, log_file: Option<&Path>) {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    match format {
        "pretty" => layers.push(tracing_subscriber::fmt::layer().boxed()),
        _ => layers.push(tracing_subscriber::fmt::layer().json().boxed()),
    }

    if let Some(path) = log_file
        && let Some(file) = open_log_file(path)
    {
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(EnvFilter::new(level))
        .init();
}

/// Open the persistent log file for appending, creating parents
fn open_log_file(path: &Path) -> Option<std::fs::File> {
    let result: std::io::Result<std::fs::File> = (|| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
    })();

    match result {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!(
                "warning: cannot open log file {}: {e}; continuing without it",
                path.display()
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_log_file_creates_parents() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("logs/nested/manager.log");

        assert!(open_log_file(&path).is_some());
        assert!(path.is_file());

        // Append mode: reopening must not truncate existing lines
        std::fs::write(&path, b"line\n").unwrap();
        let _ = open_log_file(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"line\n");
    }

    #[test]
    fn test_open_log_file_degrades_on_bad_path() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("occupied");
        std::fs::write(&blocker, b"x").unwrap();

        // Parent is a regular file; creation fails without panicking
        assert!(open_log_file(&blocker.join("manager.log")).is_none());
    }
}
