use log::{debug, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::DriveConfig;
use crate::sync_state::{Drive, SyncState, Transition};

/// Files the engine itself writes on a drive start with this prefix and are
/// never cataloged or synced.
pub const INTERNAL_FILE_PREFIX: &str = ".photovault";
const PROBE_FILE_NAME: &str = ".photovault-probe";

pub fn is_internal_file(name: &str) -> bool {
    name.starts_with(INTERNAL_FILE_PREFIX)
}

/// Connected means: the path exists, is a directory and accepts a write.
pub fn probe_path(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    let probe = path.join(format!("{}-{}", PROBE_FILE_NAME, std::process::id()));
    match fs::write(&probe, b"probe") {
        Ok(()) => {
            if let Err(e) = fs::remove_file(&probe) {
                warn!("Could not remove probe file {}: {}", probe.display(), e);
            }
            true
        }
        Err(e) => {
            debug!("Drive {} is not writable: {}", path.display(), e);
            false
        }
    }
}

pub fn root_missing(root: &Path) -> std::io::Error {
    std::io::Error::new(
        ErrorKind::NotFound,
        format!("{} is no longer available", root.display()),
    )
}

/// Creates the directories of `relative` below `root`, one level at a time.
/// The root itself is never created: a drive that went away stays away.
pub fn create_dirs_beneath(root: &Path, relative: &Path) -> std::io::Result<()> {
    if !root.is_dir() {
        return Err(root_missing(root));
    }
    let mut dir = root.to_path_buf();
    for component in relative.components() {
        dir.push(component);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists && dir.is_dir() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Tracks reachability of the primary and backup drives. The only writer of
/// connectivity in [`SyncState`].
#[derive(Clone)]
pub struct DriveMonitor {
    state: Arc<SyncState>,
    probe_timeout: Duration,
}

impl DriveMonitor {
    pub fn new(state: Arc<SyncState>, probe_timeout: Duration) -> Self {
        Self {
            state,
            probe_timeout,
        }
    }

    async fn probe_with_timeout(&self, path: PathBuf) -> bool {
        let display = path.display().to_string();
        let probe = tokio::task::spawn_blocking(move || probe_path(&path));
        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                warn!("Probe task for {} failed: {}", display, e);
                false
            }
            Err(_) => {
                warn!("Probe of {} timed out after {:?}", display, self.probe_timeout);
                false
            }
        }
    }

    /// Probes both drives and returns the transitions that happened.
    pub async fn probe(&self, drives: &DriveConfig) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for (drive, path) in [
            (Drive::Primary, drives.primary_path.clone()),
            (Drive::Backup, drives.backup_path.clone()),
        ] {
            let transition = match path {
                Some(path) => {
                    let connected = self.probe_with_timeout(path).await;
                    self.state.set_drive(drive, true, connected)
                }
                None => self.state.set_drive(drive, false, false),
            };
            if let Some(transition) = transition {
                info!(
                    "{:?} drive: {:?} -> {:?}",
                    transition.drive, transition.from, transition.to
                );
                transitions.push(transition);
            }
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_state::DriveStatus;
    use tempfile::TempDir;

    #[test]
    fn test_probe_path() {
        let dir = TempDir::new().unwrap();
        assert!(probe_path(dir.path()));
        // Probe leaves nothing behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        let file = dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();
        assert!(!probe_path(&file));
        assert!(!probe_path(&dir.path().join("missing")));
    }

    #[tokio::test]
    async fn test_probe_reports_transitions() {
        let primary = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let state = SyncState::new();
        let monitor = DriveMonitor::new(state.clone(), Duration::from_secs(2));

        let drives = DriveConfig {
            primary_path: Some(primary.path().to_path_buf()),
            backup_path: Some(backup.path().join("gone")),
        };
        let transitions = monitor.probe(&drives).await;
        assert_eq!(transitions.len(), 2);
        assert_eq!(state.drive_status(Drive::Primary), DriveStatus::Connected);
        assert_eq!(state.drive_status(Drive::Backup), DriveStatus::Disconnected);

        assert!(monitor.probe(&drives).await.is_empty());

        let unconfigured = DriveConfig::default();
        monitor.probe(&unconfigured).await;
        assert_eq!(state.drive_status(Drive::Primary), DriveStatus::Unconfigured);
    }

    #[test]
    fn test_internal_files() {
        assert!(is_internal_file(".photovault-probe-12"));
        assert!(is_internal_file(".photovault-tmp-a.jpg"));
        assert!(!is_internal_file("photo.jpg"));
    }
}
