//! Backup and restore of the model storage directory
//!
//! Archives are plain `tar.gz` files holding the model tree plus a JSON
//! metadata record, so they stay readable with nothing but standard
//! tooling even if this manager disappears.

mod manager;
mod metadata;

pub use manager::{
    ArchiveManager, Backup, CheckResult, RestoreOutcome, StatusReport, Verification,
    available_space, dir_size, human_bytes,
};
pub use metadata::{BackupMetadata, METADATA_FILE};
