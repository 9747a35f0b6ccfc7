use chrono::Utc;
use log::{debug, error, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{Config, DriveConfig};
use crate::content_hash::{ContentHashIndex, DuplicateGroup, HashReport};
use crate::db::{Catalog, FilterCriteria, Photo};
use crate::db_albums::{Album, Tag};
use crate::db_sync_ops::SyncOperation;
use crate::drive_monitor::DriveMonitor;
use crate::error::{VaultError, VaultResult};
use crate::indexer::{LibraryScanner, ScanGuard, ScanReport};
use crate::photo_relocator;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::sync_queue::{DrainReport, QueueStatus, SyncQueue};
use crate::sync_state::{CancelToken, Drive, DriveStatus, SyncState, Transition};
use crate::vault_types::{
    BytesFreedResponse, DriveConfigResponse, DrivePathsRequest, MovePhotosRequest, PhotoIdsRequest,
    PhotosQuery, RenamePhotoRequest, RetryResponse, ScanAccepted, ScanRequest, SyncStatusResponse,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};

/// Completed sync operations older than this are pruned by maintenance.
pub const COMPLETED_RETENTION_DAYS: i64 = 7;

/// The engine facade. Owns every component and wires them into the
/// operations the HTTP layer and the scheduler call. Cheap to clone.
#[derive(Clone)]
pub struct PhotoVault {
    config: Arc<Config>,
    catalog: Catalog,
    drives: Arc<RwLock<DriveConfig>>,
    state: Arc<SyncState>,
    monitor: DriveMonitor,
    scanner: LibraryScanner,
    hashes: ContentHashIndex,
    queue: SyncQueue,
    reconciler: Reconciler,
}

impl PhotoVault {
    pub fn open(config: Config) -> VaultResult<Self> {
        let catalog = Catalog::open(&config.db_path)?;
        let drives = DriveConfig::load_or_seed(&config)?;
        let state = SyncState::new();

        let monitor = DriveMonitor::new(state.clone(), config.probe_timeout);
        let scanner = LibraryScanner::new(catalog.clone());
        let hashes = ContentHashIndex::new(catalog.clone(), config.hash_chunk_size);
        let queue = SyncQueue::new(
            catalog.clone(),
            state.clone(),
            config.sync.clone(),
            config.hash_chunk_size,
        );
        let reconciler = Reconciler::new(
            catalog.clone(),
            state.clone(),
            queue.clone(),
            config.hash_chunk_size,
        );
        queue.refresh_counts()?;

        info!("Photo vault opened, drives: {:?}", drives);
        Ok(Self {
            config: Arc::new(config),
            catalog,
            drives: Arc::new(RwLock::new(drives)),
            state,
            monitor,
            scanner,
            hashes,
            queue,
            reconciler,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn scanner(&self) -> &LibraryScanner {
        &self.scanner
    }

    pub fn drives(&self) -> DriveConfig {
        self.drives
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn connected_root(&self, drive: Drive) -> VaultResult<PathBuf> {
        let drives = self.drives();
        let root = match drive {
            Drive::Primary => drives.require_primary()?,
            Drive::Backup => drives.require_backup()?,
        };
        if !self.state.is_connected(drive) {
            return Err(VaultError::Config(format!(
                "{:?} drive at {} is disconnected",
                drive,
                root.display()
            )));
        }
        Ok(root.to_path_buf())
    }

    // ===== DRIVES =====

    /// Probes both drives and reacts to transitions: a drive coming back
    /// resumes an interrupted scan or starts a reconciliation.
    pub async fn probe_drives(&self) -> Vec<Transition> {
        let transitions = self.monitor.probe(&self.drives()).await;

        for transition in &transitions {
            if transition.to != DriveStatus::Connected {
                if transition.from == DriveStatus::Connected {
                    warn!("{:?} drive disconnected, sync paused", transition.drive);
                }
                continue;
            }
            if transition.drive == Drive::Primary {
                if let Ok(root) = self.connected_root(Drive::Primary) {
                    if self.scanner.has_checkpoint(&root) {
                        info!("Primary drive is back, resuming the interrupted scan");
                        self.spawn_scan(root);
                    }
                }
            }
        }

        let connected = transitions.iter().any(|t| t.to == DriveStatus::Connected);
        if connected && self.state.snapshot().both_connected() {
            self.spawn_reconcile("drive connected");
            self.queue.wake();
        }
        transitions
    }

    pub fn get_config(&self) -> DriveConfigResponse {
        let drives = self.drives();
        DriveConfigResponse {
            primary_drive: drives.primary_path.map(|p| p.display().to_string()),
            backup_drive: drives.backup_path.map(|p| p.display().to_string()),
            primary_status: self.state.drive_status(Drive::Primary),
            backup_status: self.state.drive_status(Drive::Backup),
        }
    }

    /// Persists new drive locations and re-probes. Fields left out keep their value.
    pub async fn set_drive_paths(&self, request: DrivePathsRequest) -> VaultResult<DriveConfigResponse> {
        let mut next = self.drives();
        if let Some(primary) = request.primary {
            next.primary_path = Some(drive_path(&primary, "primary")?);
        }
        if let Some(backup) = request.backup {
            next.backup_path = Some(drive_path(&backup, "backup")?);
        }
        if let (Some(primary), Some(backup)) = (&next.primary_path, &next.backup_path) {
            if primary.starts_with(backup) || backup.starts_with(primary) {
                return Err(VaultError::InvalidInput(
                    "primary and backup drives must not contain each other".to_string(),
                ));
            }
        }

        next.save(Path::new(&self.config.data_path))?;
        info!("Drive paths updated: {:?}", next);
        *self.drives.write().unwrap_or_else(PoisonError::into_inner) = next;

        self.probe_drives().await;
        Ok(self.get_config())
    }

    // ===== SYNC =====

    pub fn get_sync_queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    /// Probes the drives first so connectivity is current, then reports.
    /// Starts a background reconciliation when the last one is stale.
    pub async fn verify_sync_status(&self) -> SyncStatusResponse {
        self.probe_drives().await;

        let snapshot = self.state.snapshot();
        let generation = self.catalog.generation();
        if snapshot.both_connected()
            && !snapshot.sync_in_progress
            && snapshot.last_delta_generation != Some(generation)
        {
            self.spawn_reconcile("catalog changed since the last reconciliation");
        }

        SyncStatusResponse {
            primary_connected: snapshot.primary == DriveStatus::Connected,
            backup_connected: snapshot.backup == DriveStatus::Connected,
            primary_status: snapshot.primary,
            backup_status: snapshot.backup,
            is_in_sync: snapshot.is_in_sync(generation),
            is_sync_in_progress: self.queue.status().is_sync_in_progress,
            pending_operations: snapshot.pending_operations + snapshot.in_flight_operations,
            last_sync: snapshot.last_sync,
        }
    }

    pub async fn reconcile(&self) -> VaultResult<ReconcileReport> {
        let primary = self.connected_root(Drive::Primary)?;
        let backup = self.connected_root(Drive::Backup)?;
        self.reconciler.reconcile(primary, backup).await
    }

    fn spawn_reconcile(&self, reason: &'static str) {
        if self.scanner.is_running() {
            debug!("Reconciliation ({}) deferred until the running scan finishes", reason);
            return;
        }
        let vault = self.clone();
        tokio::spawn(async move {
            debug!("Starting reconciliation: {}", reason);
            if let Err(e) = vault.reconcile().await {
                warn!("Background reconciliation failed: {}", e);
            }
        });
    }

    /// Drains the queue now. When that empties a queue filled by a non-empty
    /// delta, reconciles once more so the in-sync verdict reflects the result.
    pub async fn flush_sync_queue(&self) -> VaultResult<DrainReport> {
        let drives = self.drives();
        let (Some(primary), Some(backup)) = (drives.primary_path, drives.backup_path) else {
            let counts = self.queue.refresh_counts()?;
            return Ok(DrainReport {
                skipped: Some("a drive is not configured".to_string()),
                pending_operations: counts.pending + counts.in_flight,
                ..Default::default()
            });
        };

        let report = self.queue.flush(&primary, &backup).await?;
        if report.interrupted {
            // The drain may have noticed a vanished drive before the monitor did.
            self.probe_drives().await;
        }
        if report.completed > 0
            && report.failed == 0
            && report.pending_operations == 0
            && self.state.snapshot().last_delta_empty == Some(false)
        {
            if let Err(e) = self.reconcile().await {
                warn!("Confirming reconciliation failed: {}", e);
            }
        }
        Ok(report)
    }

    /// Worker entry point: drains only when there is work and both drives are up.
    pub async fn drain_pending(&self) -> VaultResult<Option<DrainReport>> {
        let snapshot = self.state.snapshot();
        if !snapshot.both_connected() || snapshot.pending_operations == 0 {
            return Ok(None);
        }
        self.flush_sync_queue().await.map(Some)
    }

    pub fn get_failed_operations(&self) -> VaultResult<Vec<SyncOperation>> {
        self.queue.failed_operations()
    }

    pub fn retry_failed(&self) -> VaultResult<RetryResponse> {
        Ok(RetryResponse {
            requeued: self.queue.retry_failed()?,
        })
    }

    // ===== SCANNING =====

    /// Validates the request and starts the scan in the background.
    pub fn scan_library(&self, request: ScanRequest) -> VaultResult<ScanAccepted> {
        if request.primary_path.trim().is_empty() {
            return Err(VaultError::InvalidInput("primary_path is required".to_string()));
        }
        let root = self.connected_root(Drive::Primary)?;
        if !same_location(Path::new(request.primary_path.trim()), &root) {
            return Err(VaultError::Config(format!(
                "{} is not the configured primary drive {}",
                request.primary_path,
                root.display()
            )));
        }

        let guard = self.scanner.begin()?;
        let vault = self.clone();
        let scan_root = root.clone();
        tokio::spawn(async move {
            if let Err(e) = vault.scan_claimed(guard, scan_root).await {
                error!("Library scan failed: {}", e);
            }
        });

        Ok(ScanAccepted {
            accepted: true,
            root: root.display().to_string(),
        })
    }

    /// Scans the primary drive, hashes what changed and, if both drives are
    /// connected, reconciles. Used by startup and the nightly job.
    pub async fn run_scan(&self) -> VaultResult<ScanReport> {
        let root = self.connected_root(Drive::Primary)?;
        let guard = self.scanner.begin()?;
        self.scan_claimed(guard, root).await
    }

    fn spawn_scan(&self, root: PathBuf) {
        let Ok(guard) = self.scanner.begin() else {
            return;
        };
        let vault = self.clone();
        tokio::spawn(async move {
            if let Err(e) = vault.scan_claimed(guard, root).await {
                error!("Resumed library scan failed: {}", e);
            }
        });
    }

    async fn scan_claimed(&self, guard: ScanGuard, root: PathBuf) -> VaultResult<ScanReport> {
        let scanner = self.scanner.clone();
        let cancel = CancelToken::new(self.state.clone()).bind(Drive::Primary);
        let scan_root = root.clone();
        let report =
            tokio::task::spawn_blocking(move || scanner.scan_with_guard(guard, &scan_root, &cancel))
                .await??;
        if report.cancelled {
            return Ok(report);
        }

        self.hash_pending().await?;
        if self.state.snapshot().both_connected() {
            if let Err(e) = self.reconcile().await {
                warn!("Post-scan reconciliation failed: {}", e);
            }
        }
        Ok(report)
    }

    pub fn get_scan_report(&self) -> Option<ScanReport> {
        self.scanner.last_report()
    }

    pub async fn hash_pending(&self) -> VaultResult<HashReport> {
        let root = self.connected_root(Drive::Primary)?;
        let hashes = self.hashes.clone();
        let cancel = CancelToken::new(self.state.clone()).bind(Drive::Primary);
        tokio::task::spawn_blocking(move || hashes.hash_pending(&root, &cancel)).await?
    }

    // ===== PHOTOS =====

    pub fn get_photos(&self, query: &PhotosQuery) -> VaultResult<Vec<Photo>> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if limit <= 0 || limit > MAX_PAGE_SIZE {
            return Err(VaultError::InvalidInput(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        if let Some(after_id) = query.after_id {
            return self.catalog.list_photos_after(after_id, limit);
        }
        let offset = query.offset.unwrap_or(0);
        if offset < 0 {
            return Err(VaultError::InvalidInput("offset must not be negative".to_string()));
        }
        self.catalog.list_photos(limit, offset)
    }

    /// Removes photos from the catalog and their files from the primary drive.
    /// Backup copies go away with the next reconciliation.
    pub async fn delete_photos(&self, request: PhotoIdsRequest) -> VaultResult<BytesFreedResponse> {
        if request.photo_ids.is_empty() {
            return Ok(BytesFreedResponse { bytes_freed: 0 });
        }
        let root = self.connected_root(Drive::Primary)?;
        let catalog = self.catalog.clone();

        let outcome = tokio::task::spawn_blocking(move || -> VaultResult<_> {
            let outcome = catalog.delete_photos(&request.photo_ids)?;
            for path in &outcome.removed_paths {
                remove_library_file(&root.join(path));
            }
            Ok(outcome)
        })
        .await??;

        self.queue.refresh_counts()?;
        info!(
            "Deleted {} photos, {} bytes freed",
            outcome.removed_ids.len(),
            outcome.bytes_freed
        );
        Ok(BytesFreedResponse {
            bytes_freed: outcome.bytes_freed,
        })
    }

    /// Moves photos into `target_dir` on the primary drive, keeping their file
    /// names. Refused while a scan runs so the walk never sees a half-moved tree.
    pub async fn move_photos(&self, request: MovePhotosRequest) -> VaultResult<Vec<Photo>> {
        if request.photo_ids.is_empty() {
            return Ok(Vec::new());
        }
        let root = self.connected_root(Drive::Primary)?;
        let target_dir = photo_relocator::validate_target_dir(&root, &request.target_dir)?;
        let guard = self.scanner.begin()?;
        let catalog = self.catalog.clone();

        let moved = tokio::task::spawn_blocking(move || -> VaultResult<_> {
            let _guard = guard;
            let mut moves = Vec::with_capacity(request.photo_ids.len());
            for id in request.photo_ids {
                let photo = catalog
                    .find_by_id(id)?
                    .ok_or_else(|| VaultError::NotFound(format!("photo {} not found", id)))?;
                let to = photo_relocator::move_target(&photo, &target_dir);
                moves.push((photo, to));
            }
            photo_relocator::relocate(&catalog, &root, moves)
        })
        .await??;

        self.queue.refresh_counts()?;
        Ok(moved)
    }

    /// Renames one photo in place. The format must stay the same.
    pub async fn rename_photo(&self, photo_id: i64, request: RenamePhotoRequest) -> VaultResult<Photo> {
        let new_name = photo_relocator::validate_file_name(&request.new_name)?;
        let root = self.connected_root(Drive::Primary)?;
        let guard = self.scanner.begin()?;
        let catalog = self.catalog.clone();

        let renamed = tokio::task::spawn_blocking(move || -> VaultResult<_> {
            let _guard = guard;
            let photo = catalog
                .find_by_id(photo_id)?
                .ok_or_else(|| VaultError::NotFound(format!("photo {} not found", photo_id)))?;
            let format = crate::mimetype_detector::from_path(Path::new(&new_name));
            if format.as_ref().map(|f| f.format_name()) != Some(photo.format.as_str()) {
                return Err(VaultError::InvalidInput(format!(
                    "{} would change the format of a {} photo",
                    new_name, photo.format
                )));
            }
            let to = photo_relocator::rename_target(&photo, &new_name);
            photo_relocator::relocate(&catalog, &root, vec![(photo, to)])?
                .pop()
                .ok_or_else(|| VaultError::NotFound(format!("photo {} not found", photo_id)))
        })
        .await??;

        self.queue.refresh_counts()?;
        Ok(renamed)
    }

    pub fn filter_photos(&self, criteria: &FilterCriteria) -> VaultResult<Vec<Photo>> {
        self.catalog.filter_photos(criteria)
    }

    // ===== ALBUMS =====

    pub fn get_albums(&self) -> VaultResult<Vec<Album>> {
        self.catalog.list_albums()
    }

    pub fn create_album(&self, name: &str) -> VaultResult<Album> {
        self.catalog.create_album(name)
    }

    pub fn delete_album(&self, album_id: i64) -> VaultResult<()> {
        self.catalog.delete_album(album_id)
    }

    pub fn get_photos_by_album(&self, album_id: i64) -> VaultResult<Vec<Photo>> {
        self.catalog.list_photos_by_album(album_id)
    }

    pub fn add_photos_to_album(&self, album_id: i64, photo_ids: &[i64]) -> VaultResult<()> {
        self.catalog.add_photos_to_album(photo_ids, album_id)
    }

    pub fn remove_photos_from_album(&self, album_id: i64, photo_ids: &[i64]) -> VaultResult<()> {
        self.catalog.remove_photos_from_album(photo_ids, album_id)
    }

    // ===== TAGS =====

    pub fn add_tag(&self, photo_id: i64, name: &str) -> VaultResult<Tag> {
        self.catalog.add_tag(photo_id, name)
    }

    pub fn remove_tag(&self, photo_id: i64, tag_id: i64) -> VaultResult<()> {
        self.catalog.remove_tag(photo_id, tag_id)
    }

    pub fn photo_tags(&self, photo_id: i64) -> VaultResult<Vec<Tag>> {
        self.catalog.photo_tags(photo_id)
    }

    pub fn all_tags(&self) -> VaultResult<Vec<Tag>> {
        self.catalog.all_tags()
    }

    // ===== DUPLICATES =====

    pub fn find_duplicates(&self) -> VaultResult<Vec<DuplicateGroup>> {
        self.hashes.find_duplicates()
    }

    pub async fn delete_duplicates(&self, request: PhotoIdsRequest) -> VaultResult<BytesFreedResponse> {
        let root = self.connected_root(Drive::Primary)?;
        let hashes = self.hashes.clone();
        let bytes_freed =
            tokio::task::spawn_blocking(move || hashes.delete_duplicates(&request.photo_ids, &root))
                .await??;
        self.queue.refresh_counts()?;
        Ok(BytesFreedResponse { bytes_freed })
    }

    // ===== MAINTENANCE =====

    /// Vacuums the catalog and prunes old completed sync operations.
    pub async fn run_maintenance(&self) -> VaultResult<usize> {
        let catalog = self.catalog.clone();
        let queue = self.queue.clone();
        tokio::task::spawn_blocking(move || -> VaultResult<usize> {
            catalog.vacuum()?;
            queue.prune_completed(Utc::now() - chrono::Duration::days(COMPLETED_RETENTION_DAYS))
        })
        .await?
    }

    /// Startup sequence: requeue interrupted operations, learn which drives
    /// are present, then bring the catalog and the backup up to date.
    pub async fn startup(&self) -> VaultResult<()> {
        self.queue.recover_in_flight()?;
        // Probe through the monitor directly; reconciling before the first scan
        // would compare the backup against a stale catalog.
        self.monitor.probe(&self.drives()).await;

        if self.state.is_connected(Drive::Primary) {
            match self.run_scan().await {
                Ok(report) => info!(
                    "Startup scan: {} visited, {} catalog writes, {} errors",
                    report.visited,
                    report.writes(),
                    report.errors.len()
                ),
                Err(e) => warn!("Startup scan failed: {}", e),
            }
        } else {
            warn!("Primary drive not connected at startup, skipping the initial scan");
        }
        // Operations left Pending by the last run.
        self.queue.wake();
        Ok(())
    }

    /// Liveness of the catalog for the readiness probe.
    pub fn check_ready(&self) -> VaultResult<i64> {
        if self.catalog.is_corrupted() {
            return Err(VaultError::Corrupted(
                "catalog is waiting for recovery".to_string(),
            ));
        }
        self.catalog.count_photos()
    }

    pub fn recover(&self) -> VaultResult<()> {
        self.catalog.recover()
    }
}

fn drive_path(value: &str, which: &str) -> VaultResult<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(VaultError::InvalidInput(format!("{} path must not be empty", which)));
    }
    let path = PathBuf::from(trimmed);
    if !path.is_absolute() {
        return Err(VaultError::InvalidInput(format!(
            "{} path must be absolute: {}",
            which, trimmed
        )));
    }
    Ok(path)
}

fn same_location(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn remove_library_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_vault(data: &TempDir) -> PhotoVault {
        PhotoVault::open(Config::for_data_path(data.path())).unwrap()
    }

    #[tokio::test]
    async fn test_set_drive_paths_validates_and_persists() {
        let data = TempDir::new().unwrap();
        let primary = TempDir::new().unwrap();
        let vault = open_vault(&data);

        let err = vault
            .set_drive_paths(DrivePathsRequest {
                primary: Some("relative/path".to_string()),
                backup: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(_)));

        let nested = primary.path().join("backup");
        let err = vault
            .set_drive_paths(DrivePathsRequest {
                primary: Some(primary.path().display().to_string()),
                backup: Some(nested.display().to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(_)));

        let response = vault
            .set_drive_paths(DrivePathsRequest {
                primary: Some(primary.path().display().to_string()),
                backup: None,
            })
            .await
            .unwrap();
        assert_eq!(
            response.primary_drive,
            Some(primary.path().display().to_string())
        );
        assert_eq!(response.primary_status, DriveStatus::Connected);
        assert_eq!(response.backup_status, DriveStatus::Unconfigured);

        let reloaded = DriveConfig::load(data.path()).unwrap();
        assert_eq!(reloaded.primary_path.as_deref(), Some(primary.path()));
    }

    #[tokio::test]
    async fn test_get_photos_rejects_bad_pages() {
        let data = TempDir::new().unwrap();
        let vault = open_vault(&data);

        for query in [
            PhotosQuery { limit: Some(0), ..Default::default() },
            PhotosQuery { limit: Some(MAX_PAGE_SIZE + 1), ..Default::default() },
            PhotosQuery { offset: Some(-1), ..Default::default() },
        ] {
            assert!(matches!(
                vault.get_photos(&query),
                Err(VaultError::InvalidInput(_))
            ));
        }
        assert!(vault.get_photos(&PhotosQuery::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_requires_configured_connected_primary() {
        let data = TempDir::new().unwrap();
        let primary = TempDir::new().unwrap();
        let vault = open_vault(&data);

        let request = ScanRequest {
            primary_path: primary.path().display().to_string(),
        };
        assert!(matches!(
            vault.scan_library(request.clone()),
            Err(VaultError::Config(_))
        ));

        vault
            .set_drive_paths(DrivePathsRequest {
                primary: Some(primary.path().display().to_string()),
                backup: None,
            })
            .await
            .unwrap();

        let elsewhere = TempDir::new().unwrap();
        assert!(matches!(
            vault.scan_library(ScanRequest {
                primary_path: elsewhere.path().display().to_string(),
            }),
            Err(VaultError::Config(_))
        ));

        let accepted = vault.scan_library(request).unwrap();
        assert!(accepted.accepted);
    }

    #[tokio::test]
    async fn test_flush_without_drives_is_skipped() {
        let data = TempDir::new().unwrap();
        let vault = open_vault(&data);

        let report = vault.flush_sync_queue().await.unwrap();
        assert!(report.skipped.is_some());
        assert_eq!(report.pending_operations, 0);

        let status = vault.verify_sync_status().await;
        assert!(!status.is_in_sync);
        assert!(!status.primary_connected);
    }
}
