//! Archive creation, verification, restore, and retention pruning

use super::metadata::{BackupMetadata, METADATA_FILE};
use crate::client::OllamaClient;
use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

/// Archives smaller than this are rejected outright as corrupt or empty
const MIN_ARCHIVE_BYTES: u64 = 1000;

/// Prefix marking transient pre-restore staging archives; these are not
/// retention peers and are swept by `cleanup`
const PRE_RESTORE_PREFIX: &str = "pre-restore-";

/// A backup archive on disk
#[derive(Debug, Clone, Serialize)]
pub struct Backup {
    pub id: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// One verification check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    /// Advisory checks downgrade confidence without invalidating
    pub advisory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Outcome of verifying an archive
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub checks: Vec<CheckResult>,
    /// First hard-check failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        self.invalid_reason.is_none()
    }
}

/// Outcome of a restore attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    /// Declined before touching live storage (bad archive, missing force)
    Aborted { reason: String },
    /// Attempted but failed; live storage left as it was
    Failed { reason: String },
}

/// Observability view over the backup and model directories
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub backup_count: usize,
    pub backup_dir_bytes: u64,
    pub model_dir_bytes: u64,
    pub available_bytes: Option<u64>,
    pub service_reachable: bool,
    pub latest_backup: Option<String>,
}

/// Manages `*.tar.gz` backups of the model storage directory
///
/// Archive I/O shells out to the system `tar` binary. The model tree is
/// opaque; nothing here looks inside it. No lock is taken over the model
/// directory: running a restore concurrently with a pull is undefined
/// behavior callers must avoid.
pub struct ArchiveManager {
    model_dir: PathBuf,
    backup_dir: PathBuf,
    max_backups: usize,
    client: Option<Arc<OllamaClient>>,
}

impl ArchiveManager {
    pub fn new(
        model_dir: PathBuf,
        backup_dir: PathBuf,
        max_backups: usize,
        client: Option<Arc<OllamaClient>>,
    ) -> Self {
        Self {
            model_dir,
            backup_dir,
            max_backups,
            client,
        }
    }

    pub fn from_config(config: &ManagerConfig, client: Option<Arc<OllamaClient>>) -> Self {
        Self::new(
            config.model_dir.clone(),
            config.backup_dir.clone(),
            config.max_backups,
            client,
        )
    }

    /// Resolve a user-supplied path against the backup directory
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.backup_dir.join(path)
        }
    }

    fn model_dir_parts(&self) -> ManagerResult<(&Path, &std::ffi::OsStr)> {
        let parent = self
            .model_dir
            .parent()
            .ok_or_else(|| std::io::Error::other("model directory has no parent"))?;
        let base = self
            .model_dir
            .file_name()
            .ok_or_else(|| std::io::Error::other("model directory has no name"))?;
        Ok((parent, base))
    }

    /// Create a new backup of the model directory
    ///
    /// The capacity check is advisory: compression ratio is unknown ahead
    /// of time, so a shortfall warns and proceeds. The fresh archive is
    /// self-verified; a mismatch is reported but the file is retained.
    pub async fn create(&self, name: Option<&str>) -> ManagerResult<Backup> {
        if !self.model_dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("model directory not found: {:?}", self.model_dir),
            )
            .into());
        }

        tokio::fs::create_dir_all(&self.backup_dir).await?;

        let id = self.fresh_backup_id(name)?;
        let archive_path = self.backup_dir.join(format!("{id}.tar.gz"));

        // Capacity advisory: want room for roughly 2x the model tree
        let model_bytes = dir_size(&self.model_dir);
        if let Some(available) = available_space(&self.backup_dir)
            && available < model_bytes.saturating_mul(2)
        {
            let advisory = ManagerError::InsufficientSpace {
                needed_bytes: model_bytes.saturating_mul(2),
                available_bytes: available,
            };
            tracing::warn!(backup = %id, "{advisory}; proceeding anyway");
        }

        // Snapshot the installed model list for the embedded metadata,
        // degrading to the sentinel when the service is unreachable
        let models = match &self.client {
            Some(client) => match client.list_models().await {
                Ok(models) => Some(models.into_iter().map(|m| m.name).collect()),
                Err(e) => {
                    tracing::warn!(error = %e, "Model service unreachable, tagging metadata");
                    None
                }
            },
            None => None,
        };
        let metadata = BackupMetadata::capture(models);

        let stage = self.backup_dir.join(format!(".stage-{id}"));
        tokio::fs::create_dir_all(&stage).await?;
        tokio::fs::write(
            stage.join(METADATA_FILE),
            serde_json::to_vec_pretty(&metadata)?,
        )
        .await?;

        let (model_parent, model_base) = self.model_dir_parts()?;
        tracing::info!(backup = %id, model_dir = ?self.model_dir, "Creating backup archive");

        let output = Command::new("tar")
            .arg("-czf")
            .arg(&archive_path)
            .arg("-C")
            .arg(&stage)
            .arg(METADATA_FILE)
            .arg("-C")
            .arg(model_parent)
            .arg(model_base)
            .output()
            .await?;

        let _ = tokio::fs::remove_dir_all(&stage).await;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&archive_path).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(std::io::Error::other(format!(
                "tar failed ({}): {}",
                output.status,
                stderr.trim()
            ))
            .into());
        }

        // Self-verify immediately; report but never fail the create
        let verification = self.verify(&archive_path, true).await;
        if let Some(reason) = &verification.invalid_reason {
            tracing::error!(
                backup = %id,
                reason = %reason,
                "Fresh backup failed verification; archive retained"
            );
        } else {
            tracing::info!(backup = %id, "Backup verified");
        }

        let pruned = self.clean().await?;
        if pruned > 0 {
            tracing::info!(pruned = pruned, "Retention pruning after backup");
        }

        let meta = tokio::fs::metadata(&archive_path).await?;
        Ok(Backup {
            id,
            path: archive_path,
            size_bytes: meta.len(),
            created_at: meta.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now()),
        })
    }

    /// Verify an archive: hard checks (exists, size, readable) decide
    /// validity; entry checks are advisory only
    pub async fn verify(&self, path: impl AsRef<Path>, silent: bool) -> Verification {
        let path = self.resolve(path.as_ref());
        let mut checks = Vec::new();
        let mut invalid_reason = None;

        let mut hard = |checks: &mut Vec<CheckResult>,
                        invalid_reason: &mut Option<String>,
                        name,
                        passed: bool,
                        detail: Option<String>| {
            if !passed && invalid_reason.is_none() {
                *invalid_reason =
                    Some(detail.clone().unwrap_or_else(|| format!("{name} check failed")));
            }
            checks.push(CheckResult {
                name,
                passed,
                advisory: false,
                detail,
            });
            passed
        };

        let meta = std::fs::metadata(&path).ok().filter(|m| m.is_file());
        let exists = hard(
            &mut checks,
            &mut invalid_reason,
            "exists",
            meta.is_some(),
            meta.is_none()
                .then(|| format!("archive not found: {}", path.display())),
        );

        if exists {
            let size = meta.map(|m| m.len()).unwrap_or(0);
            let big_enough = hard(
                &mut checks,
                &mut invalid_reason,
                "min_size",
                size >= MIN_ARCHIVE_BYTES,
                (size < MIN_ARCHIVE_BYTES)
                    .then(|| format!("archive is only {size} bytes, definitely corrupt or empty")),
            );

            if big_enough {
                match Command::new("tar").arg("-tzf").arg(&path).output().await {
                    Ok(output) if output.status.success() => {
                        hard(&mut checks, &mut invalid_reason, "readable", true, None);

                        let listing = String::from_utf8_lossy(&output.stdout);
                        let model_base = self
                            .model_dir
                            .file_name()
                            .map(|b| b.to_string_lossy().into_owned());

                        let has_models = listing.lines().any(|line| {
                            let top = line.split('/').next().unwrap_or("");
                            top == "models" || Some(top) == model_base.as_deref()
                        });
                        checks.push(CheckResult {
                            name: "models_entry",
                            passed: has_models,
                            advisory: true,
                            detail: (!has_models)
                                .then(|| "no model tree entry in archive".to_string()),
                        });

                        let has_metadata = listing
                            .lines()
                            .any(|line| line.trim_end_matches('/') == METADATA_FILE);
                        checks.push(CheckResult {
                            name: "metadata_entry",
                            passed: has_metadata,
                            advisory: true,
                            detail: (!has_metadata)
                                .then(|| format!("no {METADATA_FILE} entry in archive")),
                        });
                    }
                    Ok(output) => {
                        let stderr = String::from_utf8_lossy(&output.stderr);
                        hard(
                            &mut checks,
                            &mut invalid_reason,
                            "readable",
                            false,
                            Some(format!("archive unreadable: {}", stderr.trim())),
                        );
                    }
                    Err(e) => {
                        hard(
                            &mut checks,
                            &mut invalid_reason,
                            "readable",
                            false,
                            Some(format!("failed to run tar: {e}")),
                        );
                    }
                }
            }
        }

        if !silent {
            for check in &checks {
                if check.passed {
                    tracing::info!(check = check.name, "Verification check passed");
                } else {
                    tracing::warn!(
                        check = check.name,
                        advisory = check.advisory,
                        detail = ?check.detail,
                        "Verification check failed"
                    );
                }
            }
        }

        if let Some(reason) = &invalid_reason {
            tracing::warn!(path = %path.display(), reason = %reason, "Archive is invalid");
        }

        Verification {
            checks,
            invalid_reason,
        }
    }

    /// List backups sorted by creation time (oldest first)
    ///
    /// Pre-restore staging archives are not backups and never appear
    /// here, so they cannot occupy a retention slot.
    pub async fn list(&self) -> ManagerResult<Vec<Backup>> {
        if !self.backup_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.backup_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.')
                || name.starts_with(PRE_RESTORE_PREFIX)
                || !name.ends_with(".tar.gz")
            {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            backups.push(Backup {
                id: name.trim_end_matches(".tar.gz").to_string(),
                path: entry.path(),
                size_bytes: meta.len(),
                created_at: meta.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now()),
            });
        }

        backups.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(backups)
    }

    /// Restore an archive into the model directory
    ///
    /// The archive is verified first; the live directory is only replaced
    /// after a fully successful extraction (remove-then-move from a
    /// scratch directory on the same filesystem).
    pub async fn restore(&self, path: impl AsRef<Path>, force: bool) -> ManagerResult<RestoreOutcome> {
        let archive = self.resolve(path.as_ref());

        let verification = self.verify(&archive, false).await;
        if let Some(reason) = verification.invalid_reason {
            let err = ManagerError::ArchiveCorrupt {
                path: archive.clone(),
                reason: reason.clone(),
            };
            tracing::error!("{err}; refusing to restore");
            return Ok(RestoreOutcome::Aborted { reason });
        }

        // Restoring under models that are mid-use risks corrupting open
        // file handles; require an explicit force. A downed service
        // cannot have anything loaded, so probe failures pass the gate.
        if !force
            && let Some(client) = &self.client
            && let Ok(loaded) = client.loaded_models().await
            && !loaded.is_empty()
        {
            let err = ManagerError::UserAborted(format!(
                "{} model(s) currently loaded; re-run with force to restore anyway",
                loaded.len()
            ));
            tracing::warn!("{err}");
            return Ok(RestoreOutcome::Aborted {
                reason: err.to_string(),
            });
        }

        // Best-effort staging of the current tree; losing it is an
        // accepted risk, not a reason to block the restore
        if self.model_dir.is_dir() {
            match self.create_pre_restore_backup().await {
                Ok(backup) => {
                    tracing::info!(staged = %backup.id, "Current model directory staged")
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to stage current model directory, continuing")
                }
            }
        }

        let (model_parent, _) = self.model_dir_parts()?;
        let ts = Utc::now().format("%Y%m%d-%H%M%S%3f");
        let scratch = model_parent.join(format!(".restore-scratch-{ts}"));
        tokio::fs::create_dir_all(&scratch).await?;

        let output = Command::new("tar")
            .arg("-xzf")
            .arg(&archive)
            .arg("-C")
            .arg(&scratch)
            .output()
            .await?;

        if !output.status.success() {
            let _ = tokio::fs::remove_dir_all(&scratch).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = format!("extraction failed ({}): {}", output.status, stderr.trim());
            tracing::error!(path = %archive.display(), reason = %reason, "Restore failed");
            return Ok(RestoreOutcome::Failed { reason });
        }

        let Some(extracted) = self.find_extracted_tree(&scratch).await? else {
            let _ = tokio::fs::remove_dir_all(&scratch).await;
            let reason = "archive contains no model tree".to_string();
            tracing::error!(path = %archive.display(), "{reason}");
            return Ok(RestoreOutcome::Failed { reason });
        };

        // Swap: move the live tree aside, move the extracted tree in, and
        // roll back if the final rename fails
        let aside = model_parent.join(format!(".pre-restore-old-{ts}"));
        let had_previous = self.model_dir.exists();
        if had_previous {
            tokio::fs::rename(&self.model_dir, &aside).await?;
        }

        if let Err(e) = tokio::fs::rename(&extracted, &self.model_dir).await {
            if had_previous {
                let _ = tokio::fs::rename(&aside, &self.model_dir).await;
            }
            let _ = tokio::fs::remove_dir_all(&scratch).await;
            let reason = format!("failed to move restored tree into place: {e}");
            tracing::error!("{reason}");
            return Ok(RestoreOutcome::Failed { reason });
        }

        let _ = tokio::fs::remove_dir_all(&scratch).await;
        if had_previous {
            let _ = tokio::fs::remove_dir_all(&aside).await;
        }

        tracing::info!(
            path = %archive.display(),
            model_dir = ?self.model_dir,
            "Restore complete"
        );
        Ok(RestoreOutcome::Restored)
    }

    async fn create_pre_restore_backup(&self) -> ManagerResult<Backup> {
        tokio::fs::create_dir_all(&self.backup_dir).await?;
        let ts = Utc::now().format("%Y%m%d-%H%M%S%3f");
        let archive_path = self
            .backup_dir
            .join(format!("{PRE_RESTORE_PREFIX}{ts}.tar.gz"));
        let (model_parent, model_base) = self.model_dir_parts()?;

        let output = Command::new("tar")
            .arg("-czf")
            .arg(&archive_path)
            .arg("-C")
            .arg(model_parent)
            .arg(model_base)
            .output()
            .await?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&archive_path).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(std::io::Error::other(format!(
                "staging tar failed: {}",
                stderr.trim()
            ))
            .into());
        }

        let meta = tokio::fs::metadata(&archive_path).await?;
        Ok(Backup {
            id: format!("{PRE_RESTORE_PREFIX}{ts}"),
            path: archive_path,
            size_bytes: meta.len(),
            created_at: Utc::now(),
        })
    }

    /// Locate the extracted model tree inside a scratch directory
    ///
    /// Prefers a `models/` entry, then the configured directory name,
    /// then the only subdirectory present.
    async fn find_extracted_tree(&self, scratch: &Path) -> ManagerResult<Option<PathBuf>> {
        let canonical = scratch.join("models");
        if canonical.is_dir() {
            return Ok(Some(canonical));
        }
        if let Some(base) = self.model_dir.file_name() {
            let named = scratch.join(base);
            if named.is_dir() {
                return Ok(Some(named));
            }
        }

        let mut entries = tokio::fs::read_dir(scratch).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.metadata().await?.is_dir() {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    /// Prune backups beyond the retention cap, oldest first
    pub async fn clean(&self) -> ManagerResult<usize> {
        let backups = self.list().await?;
        if backups.len() <= self.max_backups {
            return Ok(0);
        }

        let excess = backups.len() - self.max_backups;
        let mut pruned = 0;
        for backup in backups.into_iter().take(excess) {
            match tokio::fs::remove_file(&backup.path).await {
                Ok(()) => {
                    tracing::info!(backup = %backup.id, "Pruned old backup");
                    pruned += 1;
                }
                Err(e) => {
                    tracing::warn!(backup = %backup.id, error = %e, "Failed to prune backup");
                }
            }
        }
        Ok(pruned)
    }

    /// Remove stale staging artifacts (stage dirs, restore scratch dirs,
    /// pre-restore archives), then prune retention
    pub async fn cleanup(&self) -> ManagerResult<usize> {
        let mut removed = 0;

        if self.backup_dir.is_dir() {
            let mut entries = tokio::fs::read_dir(&self.backup_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let meta = entry.metadata().await?;
                if name.starts_with(".stage-") && meta.is_dir() {
                    tokio::fs::remove_dir_all(entry.path()).await?;
                    removed += 1;
                } else if name.starts_with(PRE_RESTORE_PREFIX)
                    && name.ends_with(".tar.gz")
                    && meta.is_file()
                {
                    tracing::info!(artifact = %name, "Removing pre-restore staging archive");
                    tokio::fs::remove_file(entry.path()).await?;
                    removed += 1;
                }
            }
        }

        if let Ok((model_parent, _)) = self.model_dir_parts()
            && model_parent.is_dir()
        {
            let mut entries = tokio::fs::read_dir(model_parent).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if (name.starts_with(".restore-scratch-") || name.starts_with(".pre-restore-old-"))
                    && entry.metadata().await?.is_dir()
                {
                    tokio::fs::remove_dir_all(entry.path()).await?;
                    removed += 1;
                }
            }
        }

        let pruned = self.clean().await?;
        tracing::info!(artifacts = removed, pruned = pruned, "Cleanup complete");
        Ok(removed + pruned)
    }

    /// Aggregate view over backups, storage, and service reachability
    pub async fn status(&self) -> ManagerResult<StatusReport> {
        let backups = self.list().await?;
        let service_reachable = match &self.client {
            Some(client) => client.ping().await.is_ok(),
            None => false,
        };

        Ok(StatusReport {
            backup_count: backups.len(),
            backup_dir_bytes: dir_size(&self.backup_dir),
            model_dir_bytes: dir_size(&self.model_dir),
            available_bytes: available_space(&self.backup_dir),
            service_reachable,
            latest_backup: backups.last().map(|b| b.id.clone()),
        })
    }

    /// Compute a fresh, collision-free backup identifier
    fn fresh_backup_id(&self, name: Option<&str>) -> ManagerResult<String> {
        let prefix = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => {
                if !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
                {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("backup name '{name}' contains invalid characters"),
                    )
                    .into());
                }
                format!("{name}-")
            }
            None => String::new(),
        };

        let ts = Utc::now().format("%Y%m%d-%H%M%S");
        let mut id = format!("{prefix}{ts}");
        let mut counter = 1;
        while self.backup_dir.join(format!("{id}.tar.gz")).exists() {
            id = format!("{prefix}{ts}-{counter}");
            counter += 1;
        }
        Ok(id)
    }
}

/// Render a byte count for humans
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Recursively calculate directory size
///
/// Symlinks are counted as entries, never followed, so a link cycle
/// inside the tree cannot recurse forever.
pub fn dir_size(path: &Path) -> u64 {
    let mut size = 0;

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                size += dir_size(&entry.path());
            } else if let Ok(metadata) = entry.metadata() {
                size += metadata.len();
            }
        }
    }

    size
}

/// Available bytes on the filesystem holding `path`
///
/// Picks the disk with the longest mount-point prefix; `None` when the
/// path matches no known mount.
pub fn available_space(path: &Path) -> Option<u64> {
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| resolved.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}
