//! Archive lifecycle integration tests over temporary directories
//!
//! These exercise the real system `tar` binary, matching what production
//! runs use.

use ollama_manager::backup::{ArchiveManager, RestoreOutcome};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Incompressible-ish filler so archives clear the minimum size check
fn pseudo_random_bytes(len: usize, mut seed: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        out.extend_from_slice(&(seed >> 32).to_le_bytes()[..4]);
    }
    out.truncate(len);
    out
}

struct Fixture {
    _temp: TempDir,
    manager: ArchiveManager,
    model_dir: std::path::PathBuf,
    backup_dir: std::path::PathBuf,
}

fn fixture(max_backups: usize) -> Fixture {
    let temp = TempDir::new().unwrap();
    let model_dir = temp.path().join("models");
    let backup_dir = temp.path().join("backups");

    fs::create_dir_all(model_dir.join("blobs")).unwrap();
    fs::create_dir_all(model_dir.join("manifests/library/llama3")).unwrap();
    fs::write(
        model_dir.join("blobs/sha256-0a1b2c"),
        pseudo_random_bytes(32 * 1024, 42),
    )
    .unwrap();
    fs::write(
        model_dir.join("manifests/library/llama3/8b"),
        r#"{"schemaVersion": 2}"#,
    )
    .unwrap();

    let manager = ArchiveManager::new(model_dir.clone(), backup_dir.clone(), max_backups, None);
    Fixture {
        _temp: temp,
        manager,
        model_dir,
        backup_dir,
    }
}

fn stray_entries(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(".restore-scratch-") || n.starts_with(".pre-restore-old-"))
        .collect()
}

#[tokio::test]
async fn test_create_verify_restore_roundtrip() {
    let fx = fixture(5);

    let backup = fx.manager.create(Some("roundtrip")).await.unwrap();
    assert!(backup.id.starts_with("roundtrip-"));
    assert!(backup.path.is_file());
    assert!(backup.size_bytes >= 1000);

    let verification = fx.manager.verify(&backup.path, true).await;
    assert!(verification.is_valid(), "{:?}", verification.invalid_reason);
    // Entry checks should also pass on an archive we just produced
    assert!(verification.checks.iter().all(|c| c.passed));

    // Damage the live tree: drop a blob and plant a foreign file
    let original_len = fs::metadata(fx.model_dir.join("blobs/sha256-0a1b2c"))
        .unwrap()
        .len();
    fs::remove_file(fx.model_dir.join("blobs/sha256-0a1b2c")).unwrap();
    fs::write(fx.model_dir.join("blobs/intruder"), b"not a blob").unwrap();

    let outcome = fx.manager.restore(&backup.path, false).await.unwrap();
    assert_eq!(outcome, RestoreOutcome::Restored);

    // The tree is exactly the archived one again
    let restored_len = fs::metadata(fx.model_dir.join("blobs/sha256-0a1b2c"))
        .unwrap()
        .len();
    assert_eq!(restored_len, original_len);
    assert!(!fx.model_dir.join("blobs/intruder").exists());
    assert_eq!(
        fs::read_to_string(fx.model_dir.join("manifests/library/llama3/8b")).unwrap(),
        r#"{"schemaVersion": 2}"#
    );

    // No scratch or aside directories left behind
    assert!(stray_entries(fx.model_dir.parent().unwrap()).is_empty());
}

#[tokio::test]
async fn test_restore_missing_archive_aborts_untouched() {
    let fx = fixture(5);

    let outcome = fx.manager.restore("no-such-backup.tar.gz", false).await.unwrap();
    match outcome {
        RestoreOutcome::Aborted { reason } => assert!(reason.contains("not found")),
        other => panic!("expected abort, got {other:?}"),
    }

    // Live tree untouched
    assert!(fx.model_dir.join("blobs/sha256-0a1b2c").is_file());
    assert!(stray_entries(fx.model_dir.parent().unwrap()).is_empty());
}

#[tokio::test]
async fn test_verify_rejects_truncated_archive() {
    let fx = fixture(5);
    fs::create_dir_all(&fx.backup_dir).unwrap();
    fs::write(fx.backup_dir.join("truncated.tar.gz"), vec![0u8; 999]).unwrap();

    let verification = fx.manager.verify("truncated.tar.gz", true).await;
    assert!(!verification.is_valid());
    assert!(verification.invalid_reason.unwrap().contains("999 bytes"));
}

#[tokio::test]
async fn test_verify_rejects_garbage_archive() {
    let fx = fixture(5);
    fs::create_dir_all(&fx.backup_dir).unwrap();
    // Big enough to pass the size check, but not a gzip stream
    fs::write(
        fx.backup_dir.join("garbage.tar.gz"),
        pseudo_random_bytes(4096, 7),
    )
    .unwrap();

    let verification = fx.manager.verify("garbage.tar.gz", true).await;
    assert!(!verification.is_valid());
    let failed: Vec<_> = verification
        .checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.name)
        .collect();
    assert_eq!(failed, vec!["readable"]);
}

#[tokio::test]
async fn test_retention_prunes_oldest_first() {
    let fx = fixture(5);
    fs::create_dir_all(&fx.backup_dir).unwrap();
    for i in 1..=8 {
        fs::write(
            fx.backup_dir.join(format!("backup-{i:02}.tar.gz")),
            b"placeholder",
        )
        .unwrap();
    }

    let pruned = fx.manager.clean().await.unwrap();
    assert_eq!(pruned, 3);

    let remaining = fx.manager.list().await.unwrap();
    let ids: Vec<_> = remaining.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["backup-04", "backup-05", "backup-06", "backup-07", "backup-08"]
    );

    // Already within the cap, second pass is a no-op
    assert_eq!(fx.manager.clean().await.unwrap(), 0);
}

#[tokio::test]
async fn test_list_skips_hidden_and_foreign_files() {
    let fx = fixture(5);
    fs::create_dir_all(&fx.backup_dir).unwrap();
    fs::write(fx.backup_dir.join("good.tar.gz"), b"x").unwrap();
    fs::write(fx.backup_dir.join(".partial.tar.gz"), b"x").unwrap();
    fs::write(fx.backup_dir.join("notes.txt"), b"x").unwrap();
    fs::create_dir_all(fx.backup_dir.join(".stage-old")).unwrap();

    let backups = fx.manager.list().await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].id, "good");
}

#[tokio::test]
async fn test_pre_restore_archives_are_staging_not_backups() {
    let fx = fixture(1);
    fs::create_dir_all(&fx.backup_dir).unwrap();
    let staging = fx.backup_dir.join("pre-restore-20250101-000000000.tar.gz");
    fs::write(&staging, b"staging").unwrap();
    fs::write(fx.backup_dir.join("nightly.tar.gz"), b"real").unwrap();

    // Staging archives never appear in the listing
    let backups = fx.manager.list().await.unwrap();
    let ids: Vec<_> = backups.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["nightly"]);

    // With retention capped at one, the staging file must not consume
    // the slot and evict the real backup
    assert_eq!(fx.manager.clean().await.unwrap(), 0);
    assert!(fx.backup_dir.join("nightly.tar.gz").exists());

    // Cleanup sweeps the staging archive and leaves the backup alone
    assert_eq!(fx.manager.cleanup().await.unwrap(), 1);
    assert!(!staging.exists());
    assert!(fx.backup_dir.join("nightly.tar.gz").exists());
}

#[tokio::test]
async fn test_cleanup_removes_stale_artifacts() {
    let fx = fixture(5);
    fs::create_dir_all(fx.backup_dir.join(".stage-abandoned")).unwrap();
    let parent = fx.model_dir.parent().unwrap();
    fs::create_dir_all(parent.join(".restore-scratch-20250101-000000000")).unwrap();
    fs::create_dir_all(parent.join(".pre-restore-old-20250101-000000000")).unwrap();

    let removed = fx.manager.cleanup().await.unwrap();
    assert_eq!(removed, 3);
    assert!(!fx.backup_dir.join(".stage-abandoned").exists());
    assert!(stray_entries(parent).is_empty());

    // Idempotent
    assert_eq!(fx.manager.cleanup().await.unwrap(), 0);
}

#[tokio::test]
async fn test_status_counts_backups_and_usage() {
    let fx = fixture(5);

    let before = fx.manager.status().await.unwrap();
    assert_eq!(before.backup_count, 0);
    assert_eq!(before.latest_backup, None);
    assert!(before.model_dir_bytes > 0);
    assert!(!before.service_reachable);

    let backup = fx.manager.create(None).await.unwrap();

    let after = fx.manager.status().await.unwrap();
    assert_eq!(after.backup_count, 1);
    assert_eq!(after.latest_backup.as_deref(), Some(backup.id.as_str()));
    assert!(after.backup_dir_bytes >= backup.size_bytes);
}
