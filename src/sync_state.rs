//! Process-wide synchronization state.
//!
//! One `SyncState` is created at startup and shared by reference. Writers are
//! partitioned: only the drive monitor changes connectivity, only the reconciler
//! changes the reconciliation flag and last delta, only the sync queue changes
//! the queue counters. Everyone else reads through [`SyncState::snapshot`],
//! which never blocks.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{VaultError, VaultResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Drive {
    Primary,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveStatus {
    Unconfigured,
    Disconnected,
    Connected,
}

#[derive(Default)]
struct DriveSlot {
    configured: AtomicBool,
    connected: AtomicBool,
    /// Bumped whenever the drive drops, so tokens bound before a drop stay cancelled
    /// even if the drive comes back.
    epoch: AtomicU64,
}

impl DriveSlot {
    fn status(&self) -> DriveStatus {
        if !self.configured.load(Ordering::SeqCst) {
            DriveStatus::Unconfigured
        } else if self.connected.load(Ordering::SeqCst) {
            DriveStatus::Connected
        } else {
            DriveStatus::Disconnected
        }
    }
}

const DELTA_UNKNOWN: u8 = 0;
const DELTA_EMPTY: u8 = 1;
const DELTA_NON_EMPTY: u8 = 2;

#[derive(Default)]
pub struct SyncState {
    primary: DriveSlot,
    backup: DriveSlot,
    sync_in_progress: AtomicBool,
    draining: AtomicBool,
    pending_operations: AtomicU64,
    in_flight_operations: AtomicU64,
    last_delta: AtomicU8,
    last_delta_generation: AtomicU64,
    // Milliseconds since the epoch; 0 means never.
    last_sync_millis: AtomicI64,
}

/// Immutable copy of the sync state at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSnapshot {
    pub primary: DriveStatus,
    pub backup: DriveStatus,
    pub sync_in_progress: bool,
    pub draining: bool,
    pub pending_operations: u64,
    pub in_flight_operations: u64,
    pub last_delta_empty: Option<bool>,
    pub last_delta_generation: Option<u64>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl SyncSnapshot {
    pub fn both_connected(&self) -> bool {
        self.primary == DriveStatus::Connected && self.backup == DriveStatus::Connected
    }

    /// True only if both drives are reachable, the last reconciliation found
    /// nothing to do against the current catalog, and nothing is queued.
    pub fn is_in_sync(&self, catalog_generation: u64) -> bool {
        self.both_connected()
            && self.last_delta_empty == Some(true)
            && self.last_delta_generation == Some(catalog_generation)
            && self.pending_operations == 0
            && self.in_flight_operations == 0
    }
}

/// A drive connectivity change observed by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub drive: Drive,
    pub from: DriveStatus,
    pub to: DriveStatus,
}

impl SyncState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slot(&self, drive: Drive) -> &DriveSlot {
        match drive {
            Drive::Primary => &self.primary,
            Drive::Backup => &self.backup,
        }
    }

    pub fn drive_status(&self, drive: Drive) -> DriveStatus {
        self.slot(drive).status()
    }

    pub fn is_connected(&self, drive: Drive) -> bool {
        self.drive_status(drive) == DriveStatus::Connected
    }

    fn epoch(&self, drive: Drive) -> u64 {
        self.slot(drive).epoch.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        let last_delta = self.last_delta.load(Ordering::SeqCst);
        let last_sync_millis = self.last_sync_millis.load(Ordering::SeqCst);
        SyncSnapshot {
            primary: self.primary.status(),
            backup: self.backup.status(),
            sync_in_progress: self.sync_in_progress.load(Ordering::SeqCst),
            draining: self.draining.load(Ordering::SeqCst),
            pending_operations: self.pending_operations.load(Ordering::SeqCst),
            in_flight_operations: self.in_flight_operations.load(Ordering::SeqCst),
            last_delta_empty: match last_delta {
                DELTA_EMPTY => Some(true),
                DELTA_NON_EMPTY => Some(false),
                _ => None,
            },
            last_delta_generation: (last_delta != DELTA_UNKNOWN)
                .then(|| self.last_delta_generation.load(Ordering::SeqCst)),
            last_sync: (last_sync_millis != 0)
                .then(|| Utc.timestamp_millis_opt(last_sync_millis).single())
                .flatten(),
        }
    }

    // ===== drive monitor =====

    /// Records a probe result; returns the transition when the status changed.
    pub(crate) fn set_drive(&self, drive: Drive, configured: bool, connected: bool) -> Option<Transition> {
        let slot = self.slot(drive);
        let from = slot.status();
        let connected = configured && connected;

        if from == DriveStatus::Connected && !connected {
            slot.epoch.fetch_add(1, Ordering::SeqCst);
        }
        slot.configured.store(configured, Ordering::SeqCst);
        slot.connected.store(connected, Ordering::SeqCst);

        let to = slot.status();
        (from != to).then_some(Transition { drive, from, to })
    }

    // ===== reconciler =====

    pub(crate) fn try_begin_reconcile(&self) -> bool {
        self.sync_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn finish_reconcile(&self, delta: Option<(bool, u64)>) {
        if let Some((empty, generation)) = delta {
            self.last_delta_generation.store(generation, Ordering::SeqCst);
            self.last_delta.store(
                if empty { DELTA_EMPTY } else { DELTA_NON_EMPTY },
                Ordering::SeqCst,
            );
            if empty {
                self.record_sync_time();
            }
        }
        self.sync_in_progress.store(false, Ordering::SeqCst);
    }

    pub(crate) fn record_sync_time(&self) {
        self.last_sync_millis
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    // ===== sync queue =====

    pub(crate) fn set_queue_counts(&self, pending: u64, in_flight: u64) {
        self.pending_operations.store(pending, Ordering::SeqCst);
        self.in_flight_operations.store(in_flight, Ordering::SeqCst);
    }

    pub(crate) fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::SeqCst);
    }
}

/// Cancellation for long-running work. Trips when cancelled explicitly or when
/// any drive it is bound to disconnects after binding.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<SyncState>,
    cancelled: Arc<AtomicBool>,
    bound: Vec<(Drive, u64)>,
}

impl CancelToken {
    pub fn new(state: Arc<SyncState>) -> Self {
        Self {
            state,
            cancelled: Arc::new(AtomicBool::new(false)),
            bound: Vec::new(),
        }
    }

    pub fn bind(mut self, drive: Drive) -> Self {
        let epoch = self.state.epoch(drive);
        self.bound.push((drive, epoch));
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.bound.iter().any(|&(drive, epoch)| {
                !self.state.is_connected(drive) || self.state.epoch(drive) != epoch
            })
    }

    pub fn check(&self) -> VaultResult<()> {
        if self.is_cancelled() {
            Err(VaultError::Cancelled)
        } else {
            Ok(())
        }
    }
}
