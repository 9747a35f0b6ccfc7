use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use walkdir::WalkDir;

use crate::content_hash::hash_file;
use crate::db::{Catalog, HashState, Photo};
use crate::db_sync_ops::{NewSyncOperation, SyncOpKind};
use crate::db_types::observed_mtime;
use crate::drive_monitor::is_internal_file;
use crate::error::{VaultError, VaultResult};
use crate::file_scanner::relative_path;
use crate::mimetype_detector;
use crate::sync_queue::SyncQueue;
use crate::sync_state::{CancelToken, Drive, SyncState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub copies_enqueued: u64,
    pub deletes_enqueued: u64,
    /// Paths left alone because an operation for them is queued or failed.
    pub skipped_active: u64,
    pub catalog_photos: u64,
    pub backup_files: u64,
    pub delta_empty: bool,
    pub generation: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct BackupEntry {
    size: u64,
    modified: Option<DateTime<Utc>>,
}

fn list_backup(backup_root: &Path, cancel: &CancelToken) -> VaultResult<HashMap<String, BackupEntry>> {
    let mut entries = HashMap::new();
    for entry in WalkDir::new(backup_root).sort_by_file_name() {
        cancel.check()?;
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // An unreadable subtree on the backup only means we cannot see
                // files there; the copies will be retried and fail loudly.
                warn!("Skipping unreadable backup entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || is_internal_file(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let Some(relative) = relative_path(backup_root, entry.path()) else {
            continue;
        };
        let metadata = entry.metadata().map_err(|e| {
            VaultError::Io(std::io::Error::other(format!(
                "cannot stat backup file {}: {}",
                relative, e
            )))
        })?;
        entries.insert(
            relative,
            BackupEntry {
                size: metadata.len(),
                modified: metadata.modified().ok().map(observed_mtime),
            },
        );
    }
    Ok(entries)
}

struct DeltaInput<'a> {
    catalog: &'a Catalog,
    primary_root: &'a Path,
    backup_root: &'a Path,
    chunk_size: usize,
    cancel: &'a CancelToken,
}

impl DeltaInput<'_> {
    /// True when a backup copy that is older than the primary differs in content.
    fn stale_copy(&self, photo: &Photo) -> VaultResult<bool> {
        let primary_hash = match (&photo.content_hash, photo.hash_state) {
            (Some(hash), HashState::Known) => hash.clone(),
            _ => hash_file(
                &self.primary_root.join(&photo.path),
                self.chunk_size,
                Some(self.cancel),
            )?,
        };
        let backup_hash = hash_file(
            &self.backup_root.join(&photo.path),
            self.chunk_size,
            Some(self.cancel),
        )?;
        Ok(primary_hash != backup_hash)
    }

    fn needs_copy(&self, photo: &Photo, backup: Option<&BackupEntry>) -> VaultResult<bool> {
        let Some(backup) = backup else {
            return Ok(true);
        };
        if Some(backup.size as i64) != photo.file_size {
            return Ok(true);
        }
        match (backup.modified, photo.file_modified) {
            (Some(backup_mtime), Some(primary_mtime)) if backup_mtime < primary_mtime => {
                match self.stale_copy(photo) {
                    Ok(stale) => Ok(stale),
                    Err(VaultError::Cancelled) => Err(VaultError::Cancelled),
                    Err(e) => {
                        // Can't compare: recopying is the safe answer.
                        warn!("Could not compare {} with its backup: {}", photo.path, e);
                        Ok(true)
                    }
                }
            }
            _ => Ok(false),
        }
    }

    fn compute(&self) -> VaultResult<(Vec<NewSyncOperation>, u64, u64, u64)> {
        let photos = self.catalog.list_present_photos()?;
        let represented: HashSet<String> = self.catalog.list_all_paths()?.into_iter().collect();
        // Failed operations wait for an explicit retry instead of being requeued here.
        let mut active = self.catalog.active_sync_paths()?;
        active.extend(
            self.catalog
                .failed_sync_operations()?
                .into_iter()
                .map(|op| op.path),
        );
        let backup = list_backup(self.backup_root, self.cancel)?;

        let mut ops = Vec::new();
        let mut skipped_active = 0;

        for photo in &photos {
            self.cancel.check()?;
            if active.contains(&photo.path) {
                skipped_active += 1;
                continue;
            }
            if self.needs_copy(photo, backup.get(&photo.path))? {
                debug!("Backup needs a copy of {}", photo.path);
                ops.push(NewSyncOperation {
                    kind: SyncOpKind::Copy,
                    photo_id: Some(photo.id),
                    path: photo.path.clone(),
                    content_hash: photo
                        .content_hash
                        .clone()
                        .filter(|_| photo.hash_state == HashState::Known),
                });
            }
        }

        let mut orphans: Vec<&String> = backup
            .keys()
            .filter(|path| !represented.contains(*path))
            .filter(|path| mimetype_detector::is_supported_image(Path::new(path.as_str())))
            .collect();
        orphans.sort();
        for path in orphans {
            if active.contains(path) {
                skipped_active += 1;
                continue;
            }
            debug!("Backup holds {} which the catalog does not", path);
            ops.push(NewSyncOperation {
                kind: SyncOpKind::Delete,
                photo_id: None,
                path: path.clone(),
                content_hash: None,
            });
        }

        Ok((ops, skipped_active, photos.len() as u64, backup.len() as u64))
    }
}

/// Computes the delta between catalog and backup and turns it into queued work.
#[derive(Clone)]
pub struct Reconciler {
    catalog: Catalog,
    state: Arc<SyncState>,
    queue: SyncQueue,
    chunk_size: usize,
    // Outcome of the most recent pass, for callers that arrived while it ran.
    last_outcome: Arc<watch::Sender<Option<Result<ReconcileReport, String>>>>,
}

impl Reconciler {
    pub fn new(catalog: Catalog, state: Arc<SyncState>, queue: SyncQueue, chunk_size: usize) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            catalog,
            state,
            queue,
            chunk_size,
            last_outcome: Arc::new(sender),
        }
    }

    pub fn last_report(&self) -> Option<ReconcileReport> {
        match &*self.last_outcome.borrow() {
            Some(Ok(report)) => Some(report.clone()),
            _ => None,
        }
    }

    /// Runs one reconciliation pass. If a pass is already running, waits for it
    /// and returns its result instead of starting another, unless the catalog
    /// changed after that pass began.
    pub async fn reconcile(&self, primary_root: PathBuf, backup_root: PathBuf) -> VaultResult<ReconcileReport> {
        let snapshot = self.state.snapshot();
        if !snapshot.both_connected() {
            return Err(VaultError::Config(
                "reconciliation needs both drives connected".to_string(),
            ));
        }

        loop {
            let mut outcome = self.last_outcome.subscribe();
            if self.state.try_begin_reconcile() {
                break;
            }
            info!("Reconciliation already running, waiting for its result");
            outcome
                .changed()
                .await
                .map_err(|e| VaultError::Task(e.to_string()))?;
            let finished = outcome.borrow().clone();
            match finished {
                // A pass that started before the latest catalog change is not an answer.
                Some(Ok(report)) if report.generation == self.catalog.generation() => {
                    return Ok(report)
                }
                Some(Ok(_)) => continue,
                Some(Err(reason)) => {
                    return Err(VaultError::Task(format!(
                        "concurrent reconciliation failed: {}",
                        reason
                    )))
                }
                None => {
                    return Err(VaultError::Task(
                        "reconciliation produced no result".to_string(),
                    ))
                }
            }
        }

        let started_at = Utc::now();
        let catalog = self.catalog.clone();
        let queue = self.queue.clone();
        let chunk_size = self.chunk_size;
        let cancel = CancelToken::new(self.state.clone())
            .bind(Drive::Primary)
            .bind(Drive::Backup);

        let result = tokio::task::spawn_blocking(move || -> VaultResult<ReconcileReport> {
            // Captured before reading so a concurrent write makes the result stale, not wrong.
            let generation = catalog.generation();
            let (ops, skipped_active, catalog_photos, backup_files) = DeltaInput {
                catalog: &catalog,
                primary_root: &primary_root,
                backup_root: &backup_root,
                chunk_size,
                cancel: &cancel,
            }
            .compute()?;

            let inserted = queue.enqueue_all(&ops)?;
            let inserted: HashSet<i64> = inserted.into_iter().collect();
            let copies = ops.iter().filter(|op| op.kind == SyncOpKind::Copy).count() as u64;
            let deletes = ops.len() as u64 - copies;
            // Anything the enqueue skipped raced with another queued operation.
            let raced = ops.len() as u64 - inserted.len() as u64;

            Ok(ReconcileReport {
                copies_enqueued: copies,
                deletes_enqueued: deletes,
                skipped_active: skipped_active + raced,
                catalog_photos,
                backup_files,
                delta_empty: ops.is_empty() && skipped_active == 0,
                generation,
                started_at,
                finished_at: Utc::now(),
            })
        })
        .await
        .map_err(VaultError::from)
        .and_then(|r| r);

        match &result {
            Ok(report) => {
                self.state
                    .finish_reconcile(Some((report.delta_empty, report.generation)));
                info!(
                    "Reconciliation finished: {} copies, {} deletes queued, {} already queued",
                    report.copies_enqueued, report.deletes_enqueued, report.skipped_active
                );
                self.last_outcome.send_replace(Some(Ok(report.clone())));
            }
            Err(e) => {
                self.state.finish_reconcile(None);
                warn!("Reconciliation failed: {}", e);
                self.last_outcome.send_replace(Some(Err(e.to_string())));
            }
        }
        result
    }
}
