use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use photovault::config::Config;
use photovault::db_sync_ops::{NewSyncOperation, SyncOpKind, SyncOpStatus};
use photovault::sync_state::DriveStatus;
use photovault::vault_types::{DrivePathsRequest, MovePhotosRequest, RenamePhotoRequest};
use photovault::PhotoVault;

struct Drives {
    data: TempDir,
    primary: TempDir,
    _backup_parent: TempDir,
    backup: PathBuf,
    vault: PhotoVault,
}

async fn connected_drives() -> Drives {
    let data = TempDir::new().unwrap();
    let primary = TempDir::new().unwrap();
    let backup_parent = TempDir::new().unwrap();
    let backup = backup_parent.path().join("backup");
    fs::create_dir(&backup).unwrap();

    let vault = PhotoVault::open(Config::for_data_path(data.path())).unwrap();
    let response = vault
        .set_drive_paths(DrivePathsRequest {
            primary: Some(primary.path().display().to_string()),
            backup: Some(backup.display().to_string()),
        })
        .await
        .unwrap();
    assert_eq!(response.primary_status, DriveStatus::Connected);
    assert_eq!(response.backup_status, DriveStatus::Connected);

    Drives {
        data,
        primary,
        _backup_parent: backup_parent,
        backup,
        vault,
    }
}

fn write_photo(dir: &Path, name: &str, fill: u8) {
    fs::write(dir.join(name), vec![fill; 2048]).unwrap();
}

#[tokio::test]
async fn test_missing_backup_copy_is_queued_and_flushed() {
    let drives = connected_drives().await;
    write_photo(drives.primary.path(), "sunset.jpg", 7);

    drives.vault.run_scan().await.unwrap();
    let report = drives.vault.reconcile().await.unwrap();
    assert!(!report.delta_empty);

    let status = drives.vault.get_sync_queue_status();
    assert_eq!(status.pending_operations, 1);
    let operations = drives.vault.catalog().pending_sync_operations().unwrap();
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].kind, SyncOpKind::Copy);
    assert_eq!(operations[0].path, "sunset.jpg");

    let drained = drives.vault.flush_sync_queue().await.unwrap();
    assert_eq!(drained.completed, 1);
    assert_eq!(drained.pending_operations, 0);
    assert_eq!(drives.vault.get_sync_queue_status().pending_operations, 0);
    assert_eq!(
        fs::read(drives.backup.join("sunset.jpg")).unwrap(),
        vec![7u8; 2048]
    );

    let status = drives.vault.verify_sync_status().await;
    assert!(status.primary_connected && status.backup_connected);
    assert!(status.is_in_sync);
    assert_eq!(status.pending_operations, 0);
    assert!(status.last_sync.is_some());
}

#[tokio::test]
async fn test_flush_of_empty_queue_returns_immediately() {
    let drives = connected_drives().await;

    let report = drives.vault.flush_sync_queue().await.unwrap();
    assert!(report.skipped.is_none());
    assert_eq!(report.attempted, 0);
    assert_eq!(report.pending_operations, 0);
}

#[tokio::test]
async fn test_backup_disconnect_keeps_work_pending() {
    let drives = connected_drives().await;
    write_photo(drives.primary.path(), "p1.jpg", 1);
    drives.vault.run_scan().await.unwrap();
    drives.vault.reconcile().await.unwrap();
    drives.vault.flush_sync_queue().await.unwrap();
    assert!(drives.backup.join("p1.jpg").exists());

    for (name, fill) in [("p2.jpg", 2), ("p3.jpg", 3), ("p4.jpg", 4)] {
        write_photo(drives.primary.path(), name, fill);
    }
    drives.vault.run_scan().await.unwrap();
    drives.vault.reconcile().await.unwrap();
    assert_eq!(drives.vault.get_sync_queue_status().pending_operations, 3);

    let away = drives.backup.with_file_name("unplugged");
    fs::rename(&drives.backup, &away).unwrap();
    drives.vault.probe_drives().await;

    let report = drives.vault.flush_sync_queue().await.unwrap();
    assert!(report.skipped.is_some());
    assert_eq!(report.pending_operations, 3);
    let status = drives.vault.verify_sync_status().await;
    assert!(!status.backup_connected);
    assert!(!status.is_in_sync);
    assert!(drives.vault.get_failed_operations().unwrap().is_empty());

    fs::rename(&away, &drives.backup).unwrap();
    drives.vault.probe_drives().await;
    let report = drives.vault.reconcile().await.unwrap();
    assert_eq!(report.copies_enqueued, 0);

    let p1_copies = drives
        .vault
        .catalog()
        .list_sync_operations()
        .unwrap()
        .into_iter()
        .filter(|op| op.path == "p1.jpg")
        .count();
    assert_eq!(p1_copies, 1);

    let drained = drives.vault.flush_sync_queue().await.unwrap();
    assert_eq!(drained.completed, 3);
    for name in ["p1.jpg", "p2.jpg", "p3.jpg", "p4.jpg"] {
        assert!(drives.backup.join(name).exists(), "{} missing on backup", name);
    }
}

#[tokio::test]
async fn test_backup_unplugged_between_checks_keeps_work_pending() {
    let drives = connected_drives().await;
    for (name, fill) in [("p1.jpg", 1), ("p2.jpg", 2), ("p3.jpg", 3)] {
        write_photo(drives.primary.path(), name, fill);
    }
    drives.vault.run_scan().await.unwrap();
    drives.vault.reconcile().await.unwrap();
    assert_eq!(drives.vault.get_sync_queue_status().pending_operations, 3);

    // The monitor has not noticed yet.
    let away = drives.backup.with_file_name("unplugged");
    fs::rename(&drives.backup, &away).unwrap();

    let report = drives.vault.flush_sync_queue().await.unwrap();
    assert!(report.interrupted);
    assert_eq!(report.completed, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.pending_operations, 3);
    assert!(!drives.backup.exists());
    assert_eq!(fs::read_dir(&away).unwrap().count(), 0);
    assert!(drives.vault.get_failed_operations().unwrap().is_empty());
    let status = drives.vault.verify_sync_status().await;
    assert!(!status.backup_connected);
    assert!(!status.is_in_sync);

    fs::rename(&away, &drives.backup).unwrap();
    drives.vault.probe_drives().await;
    let drained = drives.vault.flush_sync_queue().await.unwrap();
    assert_eq!(drained.completed, 3);
    for name in ["p1.jpg", "p2.jpg", "p3.jpg"] {
        assert!(drives.backup.join(name).exists(), "{} missing on backup", name);
    }
}

#[tokio::test]
async fn test_moved_and_renamed_photo_follows_on_backup() {
    let drives = connected_drives().await;
    write_photo(drives.primary.path(), "a.jpg", 5);
    drives.vault.run_scan().await.unwrap();
    drives.vault.reconcile().await.unwrap();
    drives.vault.flush_sync_queue().await.unwrap();
    assert!(drives.backup.join("a.jpg").exists());

    let id = drives.vault.catalog().find_by_path("a.jpg").unwrap().unwrap().id;
    let moved = drives
        .vault
        .move_photos(MovePhotosRequest {
            photo_ids: vec![id],
            target_dir: "2024".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(moved[0].path, "2024/a.jpg");

    let renamed = drives
        .vault
        .rename_photo(
            id,
            RenamePhotoRequest {
                new_name: "beach.jpg".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.id, id);
    assert_eq!(renamed.path, "2024/beach.jpg");
    assert!(drives.primary.path().join("2024/beach.jpg").is_file());
    assert!(!drives.primary.path().join("a.jpg").exists());

    let report = drives.vault.reconcile().await.unwrap();
    assert_eq!(report.copies_enqueued, 1);
    assert_eq!(report.deletes_enqueued, 1);
    let drained = drives.vault.flush_sync_queue().await.unwrap();
    assert_eq!(drained.completed, 2);
    assert_eq!(
        fs::read(drives.backup.join("2024/beach.jpg")).unwrap(),
        vec![5u8; 2048]
    );
    assert!(!drives.backup.join("a.jpg").exists());

    let rescan = drives.vault.run_scan().await.unwrap();
    assert_eq!(rescan.writes(), 0);
}

#[tokio::test]
async fn test_orphans_on_backup_are_removed() {
    let drives = connected_drives().await;
    write_photo(drives.primary.path(), "kept.jpg", 1);
    write_photo(&drives.backup, "stale.jpg", 2);
    fs::write(drives.backup.join("readme.txt"), b"leave me").unwrap();

    drives.vault.run_scan().await.unwrap();
    let report = drives.vault.reconcile().await.unwrap();
    assert_eq!(report.copies_enqueued + report.skipped_active, 2);

    drives.vault.flush_sync_queue().await.unwrap();
    assert!(drives.backup.join("kept.jpg").exists());
    assert!(!drives.backup.join("stale.jpg").exists());
    assert!(drives.backup.join("readme.txt").exists());
}

#[tokio::test]
async fn test_in_flight_operations_are_pending_after_restart() {
    let data = TempDir::new().unwrap();
    let id = {
        let vault = PhotoVault::open(Config::for_data_path(data.path())).unwrap();
        let id = vault
            .queue()
            .enqueue(NewSyncOperation {
                kind: SyncOpKind::Delete,
                photo_id: None,
                path: "old.jpg".to_string(),
                content_hash: None,
            })
            .unwrap()
            .unwrap();
        assert!(vault.catalog().mark_sync_in_flight(id).unwrap());
        id
    };

    let vault = PhotoVault::open(Config::for_data_path(data.path())).unwrap();
    vault.startup().await.unwrap();
    let operation = vault.catalog().find_sync_operation(id).unwrap().unwrap();
    assert_eq!(operation.status, SyncOpStatus::Pending);
    assert_eq!(operation.attempt_count, 0);
    assert_eq!(vault.get_sync_queue_status().pending_operations, 1);
}

#[tokio::test]
async fn test_drive_paths_survive_restart() {
    let drives = connected_drives().await;
    let reopened = PhotoVault::open(Config::for_data_path(drives.data.path())).unwrap();
    let config = reopened.get_config();
    assert_eq!(
        config.backup_drive,
        Some(drives.backup.display().to_string())
    );
    // Nothing probed yet in this instance.
    assert_eq!(config.backup_status, DriveStatus::Unconfigured);
}
