//! Metadata record embedded in each backup archive

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the metadata entry at the root of every archive
pub const METADATA_FILE: &str = "backup-metadata.json";

/// Sentinel recorded when the model service could not be queried at
/// backup time
pub const SERVICE_UNAVAILABLE: &str = "service_unavailable";

/// Provenance record written next to the model tree inside an archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub created_at: DateTime<Utc>,
    /// Models installed at backup time, empty when the service was down
    pub models: Vec<String>,
    /// "reachable" or the `service_unavailable` sentinel
    pub service_state: String,
    pub host: String,
    pub tool_version: String,
}

impl BackupMetadata {
    /// Capture a snapshot; `None` means the model service was unreachable
    pub fn capture(models: Option<Vec<String>>) -> Self {
        let (models, service_state) = match models {
            Some(models) => (models, "reachable".to_string()),
            None => (Vec::new(), SERVICE_UNAVAILABLE.to_string()),
        };

        Self {
            created_at: Utc::now(),
            models,
            service_state,
            host: hostname(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}
