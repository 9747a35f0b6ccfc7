use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::{Catalog, PhotoRecord};
use crate::error::{VaultError, VaultResult};
use crate::file_scanner::{FileScanner, PhotoFile, ScanItem};
use crate::metadata_extractor::MetadataExtractor;
use crate::mimetype_detector;
use crate::sync_state::CancelToken;

const PROGRESS_LOG_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanError {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub root: String,
    pub visited: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub flagged_missing: u64,
    pub restored: u64,
    pub errors: Vec<ScanError>,
    pub cancelled: bool,
    /// Continued from the checkpoint of an earlier interrupted scan.
    pub resumed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanReport {
    fn new(root: &Path, resumed: bool) -> Self {
        Self {
            root: root.display().to_string(),
            visited: 0,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            flagged_missing: 0,
            restored: 0,
            errors: Vec::new(),
            cancelled: false,
            resumed,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Catalog writes this scan performed.
    pub fn writes(&self) -> u64 {
        self.inserted + self.updated + self.flagged_missing + self.restored
    }
}

/// Where an interrupted walk stopped.
#[derive(Debug, Clone)]
struct ScanCheckpoint {
    root: PathBuf,
    last_path: Option<String>,
    seen: HashSet<String>,
}

pub type ScanGuard = OwnedMutexGuard<()>;

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Walks the primary drive and keeps the catalog in step with it.
#[derive(Clone)]
pub struct LibraryScanner {
    catalog: Catalog,
    scan_lock: Arc<Mutex<()>>,
    checkpoint: Arc<StdMutex<Option<ScanCheckpoint>>>,
    last_report: Arc<StdMutex<Option<ScanReport>>>,
}

impl LibraryScanner {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            scan_lock: Arc::new(Mutex::new(())),
            checkpoint: Arc::new(StdMutex::new(None)),
            last_report: Arc::new(StdMutex::new(None)),
        }
    }

    /// Claims the single scan slot; `Conflict` if a scan is already running.
    pub fn begin(&self) -> VaultResult<ScanGuard> {
        self.scan_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| VaultError::Conflict("a library scan is already running".to_string()))
    }

    pub fn is_running(&self) -> bool {
        self.scan_lock.try_lock().is_err()
    }

    pub fn last_report(&self) -> Option<ScanReport> {
        lock(&self.last_report).clone()
    }

    pub fn has_checkpoint(&self, root: &Path) -> bool {
        lock(&self.checkpoint)
            .as_ref()
            .map(|c| c.root == root)
            .unwrap_or(false)
    }

    pub fn scan(&self, root: &Path, cancel: &CancelToken) -> VaultResult<ScanReport> {
        let guard = self.begin()?;
        self.scan_with_guard(guard, root, cancel)
    }

    /// Runs a scan on a slot already claimed with [`LibraryScanner::begin`].
    pub fn scan_with_guard(
        &self,
        _guard: ScanGuard,
        root: &Path,
        cancel: &CancelToken,
    ) -> VaultResult<ScanReport> {
        if !root.is_dir() {
            return Err(VaultError::Config(format!(
                "scan root {} is not a readable directory",
                root.display()
            )));
        }

        // A checkpoint for a different root is useless.
        let previous = lock(&self.checkpoint).take().filter(|c| c.root == root);
        let resumed = previous.is_some();
        let (mut last_path, mut seen) = match previous {
            Some(checkpoint) => (checkpoint.last_path, checkpoint.seen),
            None => (None, HashSet::new()),
        };

        let mut report = ScanReport::new(root, resumed);
        info!(
            "Library scan of {} started{}",
            root.display(),
            if resumed { " (resuming)" } else { "" }
        );

        let scanner = FileScanner::new(root).resume_after(last_path.clone());
        let mut walk_failures: Vec<String> = Vec::new();
        let mut fatal = None;

        for item in scanner.scan() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match item {
                ScanItem::Unreadable { path, reason } => {
                    warn!("Skipping unreadable entry {}: {}", path, reason);
                    walk_failures.push(path.clone());
                    report.errors.push(ScanError { path, reason });
                }
                ScanItem::Photo(file) => {
                    report.visited += 1;
                    if report.visited % PROGRESS_LOG_INTERVAL == 0 {
                        info!("Scan progress: {} files visited", report.visited);
                    }

                    if let Err(e) = self.index_file(&file, &mut report) {
                        if e.is_storage_corruption() {
                            fatal = Some(e);
                            break;
                        }
                        warn!("Failed to index {}: {}", file.relative_path, e);
                        report.errors.push(ScanError {
                            path: file.relative_path.clone(),
                            reason: e.to_string(),
                        });
                    }
                    seen.insert(file.relative_path.clone());
                    last_path = Some(file.relative_path);
                }
            }
        }

        if report.cancelled || fatal.is_some() {
            info!(
                "Library scan interrupted after {} files, checkpoint at {:?}",
                report.visited, last_path
            );
            *lock(&self.checkpoint) = Some(ScanCheckpoint {
                root: root.to_path_buf(),
                last_path,
                seen,
            });
        } else {
            report.flagged_missing = self.flag_unseen(&seen, &walk_failures)?;
        }

        report.finished_at = Some(Utc::now());
        *lock(&self.last_report) = Some(report.clone());

        if let Some(e) = fatal {
            error!("Library scan aborted: {}", e);
            return Err(e);
        }

        info!(
            "Library scan finished: {} visited, {} new, {} updated, {} unchanged, {} missing, {} errors",
            report.visited,
            report.inserted,
            report.updated,
            report.unchanged,
            report.flagged_missing,
            report.errors.len()
        );
        Ok(report)
    }

    fn index_file(&self, file: &PhotoFile, report: &mut ScanReport) -> VaultResult<()> {
        let size = i64::try_from(file.size).unwrap_or(i64::MAX);
        let existing = self.catalog.find_by_path(&file.relative_path)?;

        if let Some(photo) = &existing {
            if photo.file_size == Some(size) && photo.file_modified == Some(file.modified) {
                if photo.is_missing && self.catalog.restore_present(photo.id)? {
                    report.restored += 1;
                } else {
                    report.unchanged += 1;
                }
                return Ok(());
            }
        }

        debug!("Extracting metadata for {}", file.relative_path);
        let metadata = MetadataExtractor::extract(&file.path);
        let format = mimetype_detector::from_path(&file.path)
            .map(|m| m.format_name().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let filename = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.relative_path.clone());

        let outcome = self.catalog.upsert_photo(&PhotoRecord {
            path: file.relative_path.clone(),
            filename,
            file_size: size,
            file_modified: file.modified,
            format,
            date_taken: metadata.taken_at,
            width: metadata.width,
            height: metadata.height,
        })?;

        if outcome.inserted {
            report.inserted += 1;
        } else if outcome.changed {
            report.updated += 1;
        } else {
            report.unchanged += 1;
        }

        if existing.map(|p| p.is_missing).unwrap_or(false) && self.catalog.restore_present(outcome.id)? {
            report.restored += 1;
        }
        Ok(())
    }

    /// Flags catalog photos the completed walk did not see. Paths beneath an
    /// entry the walk could not read are left alone.
    fn flag_unseen(&self, seen: &HashSet<String>, walk_failures: &[String]) -> VaultResult<u64> {
        let unseen: Vec<String> = self
            .catalog
            .list_all_paths()?
            .into_iter()
            .filter(|path| !seen.contains(path))
            .filter(|path| {
                !walk_failures
                    .iter()
                    .any(|failed| path == failed || path.starts_with(&format!("{}/", failed)))
            })
            .collect();

        if unseen.is_empty() {
            return Ok(0);
        }
        let flagged = self.catalog.mark_missing(&unseen)?;
        if flagged > 0 {
            info!("{} cataloged photos are no longer on disk", flagged);
        }
        Ok(flagged as u64)
    }
}
