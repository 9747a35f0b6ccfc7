use clokwerk::{Job, Scheduler, TimeUnits};
use log::{error, info, warn};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::runtime::Handle;

use crate::error::VaultError;
use crate::vault::PhotoVault;

/// Background work around the vault: nightly jobs on a clokwerk thread,
/// the drive probe and the sync worker as tokio tasks.
#[derive(Clone)]
pub struct VaultScheduler {
    vault: PhotoVault,
    runtime: Handle,
}

impl VaultScheduler {
    pub fn new(vault: PhotoVault, runtime: Handle) -> Self {
        Self { vault, runtime }
    }

    pub fn start(&self) -> JoinHandle<()> {
        let mut scheduler = Scheduler::new();

        // Full rescan, hash and reconcile at midnight
        let vault = self.vault.clone();
        let runtime = self.runtime.clone();
        scheduler.every(1.day()).at("00:00").run(move || {
            runtime.block_on(run_nightly_sync(&vault));
        });

        let vault = self.vault.clone();
        let runtime = self.runtime.clone();
        scheduler.every(1.day()).at("00:05").run(move || {
            info!("Starting scheduled catalog maintenance");
            runtime.block_on(run_maintenance(&vault));
        });

        let handle = thread::spawn(move || loop {
            scheduler.run_pending();
            thread::sleep(Duration::from_secs(60));
        });

        info!("Vault scheduler started - Full rescan at 00:00, maintenance at 00:05");
        handle
    }

    /// Re-probes the drives on a fixed interval.
    pub fn spawn_drive_probe(&self) -> tokio::task::JoinHandle<()> {
        let vault = self.vault.clone();
        let period = vault.config().probe_interval;
        self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                vault.probe_drives().await;
            }
        })
    }

    /// The single sync worker: sleeps until woken or polled, then drains.
    pub fn spawn_sync_worker(&self) -> tokio::task::JoinHandle<()> {
        let vault = self.vault.clone();
        self.runtime.spawn(async move {
            loop {
                vault.queue().wait_for_work().await;
                if let Err(e) = vault.drain_pending().await {
                    error!("Sync worker drain failed: {}", e);
                }
            }
        })
    }

    pub async fn run_startup(&self) {
        info!("Running startup recovery and rescan...");
        if let Err(e) = self.vault.startup().await {
            error!("Startup sequence failed: {}", e);
        }
    }
}

pub async fn run_nightly_sync(vault: &PhotoVault) {
    info!("Starting scheduled library rescan");
    match vault.run_scan().await {
        Ok(report) => info!(
            "Scheduled rescan finished: {} visited, {} catalog writes",
            report.visited,
            report.writes()
        ),
        Err(VaultError::Conflict(_)) => {
            warn!("Skipping scheduled rescan - another scan is already in progress")
        }
        Err(VaultError::Config(reason)) => warn!("Skipping scheduled rescan: {}", reason),
        Err(e) => error!("Scheduled rescan failed: {}", e),
    }
}

pub async fn run_maintenance(vault: &PhotoVault) {
    match vault.run_maintenance().await {
        Ok(pruned) => info!(
            "Catalog maintenance completed, {} completed sync operations pruned",
            pruned
        ),
        Err(e) => error!("Catalog maintenance failed: {}", e),
    }
}
