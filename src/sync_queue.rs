use log::{debug, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinSet;

use crate::config::SyncConfig;
use crate::db::Catalog;
use crate::db_sync_ops::{NewSyncOperation, QueueCounts, SyncOpKind, SyncOpStatus, SyncOperation};
use crate::drive_monitor::{create_dirs_beneath, root_missing, INTERNAL_FILE_PREFIX};
use crate::error::{VaultError, VaultResult};
use crate::sync_state::{CancelToken, Drive, SyncState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending_operations: u64,
    pub is_sync_in_progress: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
    /// A drive dropped or the drain was cancelled; unfinished work stays Pending.
    pub interrupted: bool,
    /// Set when the drain did not run at all.
    pub skipped: Option<String>,
    pub pending_operations: u64,
}

impl DrainReport {
    fn merge(&mut self, other: DrainReport) {
        self.attempted += other.attempted;
        self.completed += other.completed;
        self.failed += other.failed;
        self.retries += other.retries;
        self.interrupted |= other.interrupted;
    }
}

/// Delay before retry number `attempt` (1-based): base × 2^(attempt−1).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    target.with_file_name(format!("{}-tmp-{}", INTERNAL_FILE_PREFIX, name))
}

/// Copies `source` to `relative` under `backup_root` through a temporary file in
/// the target directory: stream in chunks, fsync, verify, then rename into place.
pub fn copy_verified(
    source: &Path,
    backup_root: &Path,
    relative: &str,
    expected_hash: Option<&str>,
    chunk_size: usize,
    cancel: &CancelToken,
) -> VaultResult<u64> {
    let relative = Path::new(relative);
    create_dirs_beneath(backup_root, relative.parent().unwrap_or_else(|| Path::new("")))?;
    let target = backup_root.join(relative);
    let tmp = temp_path_for(&target);
    let result = write_temp(source, &tmp, expected_hash, chunk_size, cancel)
        .and_then(|written| fs::rename(&tmp, &target).map(|_| written).map_err(VaultError::from));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_temp(
    source: &Path,
    tmp: &Path,
    expected_hash: Option<&str>,
    chunk_size: usize,
    cancel: &CancelToken,
) -> VaultResult<u64> {
    let mut input = File::open(source)?;
    let expected_size = input.metadata()?.len();
    let mut output = File::create(tmp)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut written = 0u64;

    loop {
        cancel.check()?;
        let read = match input.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        output.write_all(&buffer[..read])?;
        hasher.update(&buffer[..read]);
        written += read as u64;
    }
    output.sync_all()?;

    let on_disk = fs::metadata(tmp)?.len();
    if written != expected_size || on_disk != expected_size {
        return Err(VaultError::Io(std::io::Error::other(format!(
            "size mismatch copying {}: expected {}, wrote {}",
            source.display(),
            expected_size,
            on_disk
        ))));
    }
    if let Some(expected) = expected_hash {
        let actual = format!("{:x}", hasher.finalize());
        if actual != expected {
            return Err(VaultError::Hash(format!(
                "{} no longer matches its cataloged hash",
                source.display()
            )));
        }
    }
    Ok(written)
}

fn delete_backup_file(backup_root: &Path, relative: &str) -> VaultResult<()> {
    match fs::remove_file(backup_root.join(relative)) {
        Ok(()) => Ok(()),
        // Already gone counts as done, but only while the drive itself is there.
        Err(e) if e.kind() == ErrorKind::NotFound && backup_root.is_dir() => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(root_missing(backup_root).into()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Clone)]
struct DrainContext {
    catalog: Catalog,
    state: Arc<SyncState>,
    config: SyncConfig,
    chunk_size: usize,
    primary_root: PathBuf,
    backup_root: PathBuf,
    cancel: CancelToken,
}

impl DrainContext {
    fn refresh_counts(&self) {
        match self.catalog.sync_queue_counts() {
            Ok(counts) => self.state.set_queue_counts(counts.pending, counts.in_flight),
            Err(e) => warn!("Could not refresh sync queue counts: {}", e),
        }
    }

    /// The monitor only notices a vanished drive on its next probe, so the
    /// roots are checked again around every operation.
    fn roots_present(&self) -> bool {
        self.primary_root.is_dir() && self.backup_root.is_dir()
    }

    /// Cancellation or a vanished root: the operation goes back to Pending
    /// without spending an attempt, and the rest of the drain stops.
    fn is_interruption(&self, error: &VaultError) -> bool {
        if matches!(error, VaultError::Cancelled) || self.cancel.is_cancelled() {
            return true;
        }
        if !self.roots_present() {
            warn!("A sync drive went away during the drain: {}", error);
            self.cancel.cancel();
            return true;
        }
        false
    }

    async fn execute(&self, op: &SyncOperation) -> VaultResult<()> {
        let backup_root = self.backup_root.clone();
        let relative = op.path.clone();
        let cancel = self.cancel.clone();
        match op.kind {
            SyncOpKind::Copy => {
                let source = self.primary_root.join(&op.path);
                let expected = op.content_hash.clone();
                let chunk_size = self.chunk_size;
                tokio::task::spawn_blocking(move || {
                    copy_verified(
                        &source,
                        &backup_root,
                        &relative,
                        expected.as_deref(),
                        chunk_size,
                        &cancel,
                    )
                })
                .await??;
            }
            SyncOpKind::Delete => {
                cancel.check()?;
                tokio::task::spawn_blocking(move || delete_backup_file(&backup_root, &relative))
                    .await??;
            }
        }
        Ok(())
    }

    /// Runs the operations for one path in order. Stops at the first interruption.
    async fn run_group(self, ops: Vec<SyncOperation>) -> VaultResult<DrainReport> {
        let mut report = DrainReport::default();

        for op in ops {
            if !self.cancel.is_cancelled() && !self.roots_present() {
                warn!("A sync drive is no longer reachable, leaving {} pending", op.path);
                self.cancel.cancel();
            }
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            loop {
                // Cancelled (photo deleted) or claimed elsewhere.
                if !self.catalog.mark_sync_in_flight(op.id)? {
                    break;
                }
                report.attempted += 1;
                self.refresh_counts();

                let result = self.execute(&op).await;
                match result {
                    Ok(()) => {
                        self.catalog.mark_sync_completed(op.id)?;
                        report.completed += 1;
                        debug!("{} {} done", op.kind.as_str(), op.path);
                        break;
                    }
                    Err(e) if self.is_interruption(&e) => {
                        // Interruptions do not spend an attempt.
                        self.catalog.revert_sync_pending(op.id)?;
                        info!("{} {} interrupted, left pending", op.kind.as_str(), op.path);
                        report.interrupted = true;
                        break;
                    }
                    Err(e) => {
                        let cap = if e.is_transient() {
                            self.config.max_attempts
                        } else {
                            0
                        };
                        let outcome = self.catalog.record_sync_failure(op.id, &e.to_string(), cap)?;
                        if outcome.status == SyncOpStatus::Failed {
                            warn!(
                                "{} {} failed after {} attempts: {}",
                                op.kind.as_str(),
                                op.path,
                                outcome.attempt_count,
                                e
                            );
                            report.failed += 1;
                            break;
                        }

                        report.retries += 1;
                        let delay = backoff_delay(self.config.backoff_base, outcome.attempt_count);
                        debug!(
                            "{} {} attempt {} failed ({}), retrying in {:?}",
                            op.kind.as_str(),
                            op.path,
                            outcome.attempt_count,
                            e,
                            delay
                        );
                        self.refresh_counts();
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            self.refresh_counts();

            if report.interrupted {
                break;
            }
        }
        Ok(report)
    }
}

/// Durable queue of copy/delete operations against the backup drive.
#[derive(Clone)]
pub struct SyncQueue {
    catalog: Catalog,
    state: Arc<SyncState>,
    config: SyncConfig,
    chunk_size: usize,
    drain_lock: Arc<Mutex<()>>,
    wake: Arc<Notify>,
}

impl SyncQueue {
    pub fn new(catalog: Catalog, state: Arc<SyncState>, config: SyncConfig, chunk_size: usize) -> Self {
        Self {
            catalog,
            state,
            config,
            chunk_size,
            drain_lock: Arc::new(Mutex::new(())),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Re-reads the queue counters from the catalog into the shared state.
    pub fn refresh_counts(&self) -> VaultResult<QueueCounts> {
        let counts = self.catalog.sync_queue_counts()?;
        self.state.set_queue_counts(counts.pending, counts.in_flight);
        Ok(counts)
    }

    /// Persists operations before returning and wakes the worker.
    pub fn enqueue_all(&self, ops: &[NewSyncOperation]) -> VaultResult<Vec<i64>> {
        let ids = self.catalog.enqueue_sync_operations(ops)?;
        self.refresh_counts()?;
        if !ids.is_empty() {
            self.wake.notify_one();
        }
        Ok(ids)
    }

    pub fn enqueue(&self, op: NewSyncOperation) -> VaultResult<Option<i64>> {
        Ok(self.enqueue_all(std::slice::from_ref(&op))?.into_iter().next())
    }

    pub fn recover_in_flight(&self) -> VaultResult<usize> {
        let recovered = self.catalog.recover_in_flight()?;
        if recovered > 0 {
            info!("Requeued {} sync operations interrupted by the last shutdown", recovered);
        }
        self.refresh_counts()?;
        Ok(recovered)
    }

    /// Non-blocking; reads in-memory counters only.
    pub fn status(&self) -> QueueStatus {
        let snapshot = self.state.snapshot();
        QueueStatus {
            pending_operations: snapshot.pending_operations + snapshot.in_flight_operations,
            is_sync_in_progress: snapshot.sync_in_progress
                || snapshot.draining
                || snapshot.in_flight_operations > 0,
        }
    }

    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Sleeps until new work is signalled or the poll interval elapses.
    pub async fn wait_for_work(&self) {
        tokio::select! {
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    pub fn failed_operations(&self) -> VaultResult<Vec<SyncOperation>> {
        self.catalog.failed_sync_operations()
    }

    pub fn retry_failed(&self) -> VaultResult<usize> {
        let requeued = self.catalog.retry_failed_sync_operations()?;
        self.refresh_counts()?;
        if requeued > 0 {
            info!("Requeued {} failed sync operations", requeued);
            self.wake.notify_one();
        }
        Ok(requeued)
    }

    pub fn prune_completed(&self, older_than: chrono::DateTime<chrono::Utc>) -> VaultResult<usize> {
        let pruned = self.catalog.prune_completed_sync_operations(older_than)?;
        if pruned > 0 {
            info!("Pruned {} completed sync operations", pruned);
        }
        Ok(pruned)
    }

    /// Drains Pending operations now and returns once the attempt completes.
    /// Returns immediately, doing nothing, when either drive is not connected.
    pub async fn flush(&self, primary_root: &Path, backup_root: &Path) -> VaultResult<DrainReport> {
        if !self.state.snapshot().both_connected() {
            let counts = self.refresh_counts()?;
            return Ok(DrainReport {
                skipped: Some("a drive is disconnected".to_string()),
                pending_operations: counts.pending + counts.in_flight,
                ..Default::default()
            });
        }
        self.drain(primary_root, backup_root).await
    }

    async fn drain(&self, primary_root: &Path, backup_root: &Path) -> VaultResult<DrainReport> {
        let _guard = self.drain_lock.lock().await;
        self.state.set_draining(true);
        let result = self.drain_locked(primary_root, backup_root).await;
        self.state.set_draining(false);

        let counts = self.refresh_counts()?;
        let mut report = result?;
        report.pending_operations = counts.pending + counts.in_flight;
        if report.attempted > 0 {
            info!(
                "Sync drain: {} completed, {} failed, {} retries, {} pending{}",
                report.completed,
                report.failed,
                report.retries,
                report.pending_operations,
                if report.interrupted { " (interrupted)" } else { "" }
            );
        }
        Ok(report)
    }

    async fn drain_locked(&self, primary_root: &Path, backup_root: &Path) -> VaultResult<DrainReport> {
        let context = DrainContext {
            catalog: self.catalog.clone(),
            state: self.state.clone(),
            config: self.config.clone(),
            chunk_size: self.chunk_size,
            primary_root: primary_root.to_path_buf(),
            backup_root: backup_root.to_path_buf(),
            cancel: CancelToken::new(self.state.clone())
                .bind(Drive::Primary)
                .bind(Drive::Backup),
        };
        let mut report = DrainReport::default();

        loop {
            let pending = self.catalog.pending_sync_operations()?;
            if pending.is_empty() || context.cancel.is_cancelled() {
                report.interrupted |= context.cancel.is_cancelled() && !pending.is_empty();
                break;
            }

            // Same-path operations stay in enqueue order within one task.
            let mut groups: BTreeMap<String, Vec<SyncOperation>> = BTreeMap::new();
            for op in pending {
                groups.entry(op.path.clone()).or_default().push(op);
            }

            let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
            let mut tasks = JoinSet::new();
            for (_, ops) in groups {
                let permit = permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| VaultError::Task(e.to_string()))?;
                let context = context.clone();
                tasks.spawn(async move {
                    let result = context.run_group(ops).await;
                    drop(permit);
                    result
                });
            }

            let mut pass = DrainReport::default();
            let mut first_error = None;
            while let Some(joined) = tasks.join_next().await {
                match joined.map_err(VaultError::from).and_then(|r| r) {
                    Ok(group_report) => pass.merge(group_report),
                    Err(e) => {
                        warn!("Sync group failed: {}", e);
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }

            let progressed = pass.attempted > 0;
            report.merge(pass);
            if report.interrupted || !progressed {
                break;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::tests::test_catalog;
    use tempfile::TempDir;

    struct Fixture {
        primary: TempDir,
        backup: TempDir,
        catalog: Catalog,
        state: Arc<SyncState>,
        queue: SyncQueue,
    }

    fn fixture() -> Fixture {
        let primary = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let catalog = test_catalog();
        let state = SyncState::new();
        state.set_drive(Drive::Primary, true, true);
        state.set_drive(Drive::Backup, true, true);
        let config = Config::for_data_path(primary.path()).sync;
        let queue = SyncQueue::new(catalog.clone(), state.clone(), config, 4);
        Fixture {
            primary,
            backup,
            catalog,
            state,
            queue,
        }
    }

    fn copy(path: &str) -> NewSyncOperation {
        NewSyncOperation {
            kind: SyncOpKind::Copy,
            photo_id: None,
            path: path.to_string(),
            content_hash: None,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_flush_empty_queue_is_noop() {
        let f = fixture();
        let report = f.queue.flush(f.primary.path(), f.backup.path()).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(report.pending_operations, 0);
        assert_eq!(f.queue.status().pending_operations, 0);
    }

    #[tokio::test]
    async fn test_copy_lands_on_backup_without_temp_files() {
        let f = fixture();
        fs::create_dir_all(f.primary.path().join("2024")).unwrap();
        fs::write(f.primary.path().join("2024/a.jpg"), vec![7u8; 1000]).unwrap();
        f.queue.enqueue(copy("2024/a.jpg")).unwrap();
        assert_eq!(f.queue.status().pending_operations, 1);

        let report = f.queue.flush(f.primary.path(), f.backup.path()).await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(fs::read(f.backup.path().join("2024/a.jpg")).unwrap(), vec![7u8; 1000]);
        assert_eq!(fs::read_dir(f.backup.path().join("2024")).unwrap().count(), 1);
        assert_eq!(f.queue.status().pending_operations, 0);
    }

    #[tokio::test]
    async fn test_missing_source_fails_after_cap() {
        let f = fixture();
        let id = f.queue.enqueue(copy("ghost.jpg")).unwrap().unwrap();

        let report = f.queue.flush(f.primary.path(), f.backup.path()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.retries, 2);

        let op = f.catalog.find_sync_operation(id).unwrap().unwrap();
        assert_eq!(op.status, SyncOpStatus::Failed);
        assert_eq!(op.attempt_count, 3);
        assert_eq!(f.queue.failed_operations().unwrap().len(), 1);

        fs::write(f.primary.path().join("ghost.jpg"), b"found").unwrap();
        assert_eq!(f.queue.retry_failed().unwrap(), 1);
        let report = f.queue.flush(f.primary.path(), f.backup.path()).await.unwrap();
        assert_eq!(report.completed, 1);
    }

    #[tokio::test]
    async fn test_hash_mismatch_is_not_renamed_into_place() {
        let f = fixture();
        fs::write(f.primary.path().join("a.jpg"), b"changed").unwrap();
        f.queue
            .enqueue(NewSyncOperation {
                content_hash: Some("0".repeat(64)),
                ..copy("a.jpg")
            })
            .unwrap();

        let report = f.queue.flush(f.primary.path(), f.backup.path()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(!f.backup.path().join("a.jpg").exists());
    }

    #[tokio::test]
    async fn test_delete_of_absent_file_succeeds() {
        let f = fixture();
        f.queue
            .enqueue(NewSyncOperation {
                kind: SyncOpKind::Delete,
                ..copy("never-there.jpg")
            })
            .unwrap();
        let report = f.queue.flush(f.primary.path(), f.backup.path()).await.unwrap();
        assert_eq!(report.completed, 1);
    }

    #[tokio::test]
    async fn test_flush_while_disconnected_returns_immediately() {
        let f = fixture();
        fs::write(f.primary.path().join("a.jpg"), b"x").unwrap();
        f.queue.enqueue(copy("a.jpg")).unwrap();
        f.state.set_drive(Drive::Backup, true, false);

        let report = f.queue.flush(f.primary.path(), f.backup.path()).await.unwrap();
        assert!(report.skipped.is_some());
        assert_eq!(report.pending_operations, 1);
        assert_eq!(f.catalog.pending_sync_operations().unwrap().len(), 1);
    }

    #[test]
    fn test_cancelled_copy_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("src.jpg"), vec![1u8; 100]).unwrap();
        let token = CancelToken::new(SyncState::new());
        token.cancel();

        let result = copy_verified(
            &dir.path().join("src.jpg"),
            dir.path(),
            "out/dst.jpg",
            None,
            8,
            &token,
        );
        assert!(matches!(result, Err(VaultError::Cancelled)));
        assert_eq!(fs::read_dir(dir.path().join("out")).unwrap().count(), 0);
    }

    #[test]
    fn test_copy_never_recreates_missing_backup_root() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("src.jpg"), vec![1u8; 100]).unwrap();
        let backup_root = dir.path().join("unmounted");
        let token = CancelToken::new(SyncState::new());

        let result = copy_verified(
            &dir.path().join("src.jpg"),
            &backup_root,
            "2024/dst.jpg",
            None,
            8,
            &token,
        );
        assert!(matches!(result, Err(VaultError::Io(_))));
        assert!(!backup_root.exists());

        let result = delete_backup_file(&backup_root, "old.jpg");
        assert!(matches!(result, Err(VaultError::Io(_))));
    }

    #[tokio::test]
    async fn test_drive_vanishing_between_checks_keeps_work_pending() {
        let f = fixture();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            fs::write(f.primary.path().join(name), b"photo").unwrap();
            f.queue.enqueue(copy(name)).unwrap();
        }
        // Gone from disk, but still Connected in the shared state.
        let backup_root = f.backup.path().join("drive");
        let report = f.queue.flush(f.primary.path(), &backup_root).await.unwrap();

        assert!(report.skipped.is_none());
        assert!(report.interrupted);
        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.pending_operations, 3);
        assert!(!backup_root.exists());
        for op in f.catalog.list_sync_operations().unwrap() {
            assert_eq!(op.status, SyncOpStatus::Pending);
            assert_eq!(op.attempt_count, 0);
        }

        fs::create_dir(&backup_root).unwrap();
        let report = f.queue.flush(f.primary.path(), &backup_root).await.unwrap();
        assert_eq!(report.completed, 3);
        assert!(backup_root.join("b.jpg").exists());
    }
}
