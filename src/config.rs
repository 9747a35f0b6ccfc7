use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{VaultError, VaultResult};

const DRIVE_CONFIG_FILE: &str = "drives.json";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub data_path: String,
    pub db_path: String,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub hash_chunk_size: usize,
    pub sync: SyncConfig,
    pub initial_primary_path: Option<String>,
    pub initial_backup_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let data_path =
            env::var("PHOTOVAULT_DATA_PATH").unwrap_or_else(|_| "./data".to_string());

        Ok(Config {
            port: env::var("PHOTOVAULT_PORT")
                .unwrap_or_else(|_| "18474".to_string())
                .parse()?,
            host: env::var("PHOTOVAULT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            db_path: env::var("PHOTOVAULT_DB_PATH")
                .unwrap_or_else(|_| format!("{}/database/photovault.db", data_path)),
            data_path,
            probe_interval: Duration::from_secs(
                env::var("PHOTOVAULT_PROBE_INTERVAL_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
            ),
            probe_timeout: Duration::from_millis(
                env::var("PHOTOVAULT_PROBE_TIMEOUT_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()?,
            ),
            hash_chunk_size: env::var("PHOTOVAULT_HASH_CHUNK_SIZE")
                .unwrap_or_else(|_| "65536".to_string())
                .parse()?,
            sync: SyncConfig {
                workers: match env::var("PHOTOVAULT_SYNC_WORKERS") {
                    Ok(v) => v.parse()?,
                    Err(_) => num_cpus::get().clamp(1, 8),
                },
                max_attempts: env::var("PHOTOVAULT_SYNC_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
                backoff_base: Duration::from_millis(
                    env::var("PHOTOVAULT_SYNC_BACKOFF_MS")
                        .unwrap_or_else(|_| "500".to_string())
                        .parse()?,
                ),
                poll_interval: Duration::from_secs(
                    env::var("PHOTOVAULT_SYNC_POLL_SECS")
                        .unwrap_or_else(|_| "30".to_string())
                        .parse()?,
                ),
            },
            initial_primary_path: env::var("PHOTOVAULT_PRIMARY_PATH").ok(),
            initial_backup_path: env::var("PHOTOVAULT_BACKUP_PATH").ok(),
        })
    }

    /// Settings suitable for tests: tiny backoff, a single sync worker, small hash chunks.
    pub fn for_data_path(data_path: &Path) -> Self {
        Config {
            port: 0,
            host: "127.0.0.1".to_string(),
            data_path: data_path.to_string_lossy().to_string(),
            db_path: data_path.join("photovault.db").to_string_lossy().to_string(),
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            hash_chunk_size: 4096,
            sync: SyncConfig {
                workers: 2,
                max_attempts: 3,
                backoff_base: Duration::from_millis(1),
                poll_interval: Duration::from_secs(30),
            },
            initial_primary_path: None,
            initial_backup_path: None,
        }
    }
}

/// Drive locations chosen by the user. Connectivity is tracked separately and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveConfig {
    pub primary_path: Option<PathBuf>,
    pub backup_path: Option<PathBuf>,
}

impl DriveConfig {
    pub fn load(data_path: &Path) -> VaultResult<Self> {
        let path = data_path.join(DRIVE_CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| {
            VaultError::Config(format!("unreadable drive config {}: {}", path.display(), e))
        })
    }

    /// Loads the persisted drive paths, filling unset ones from the environment seed values.
    pub fn load_or_seed(config: &Config) -> VaultResult<Self> {
        let data_path = Path::new(&config.data_path);
        let mut drives = match Self::load(data_path) {
            Ok(drives) => drives,
            Err(e) => {
                warn!("Ignoring drive config: {}", e);
                Self::default()
            }
        };

        let mut seeded = false;
        if drives.primary_path.is_none() {
            if let Some(primary) = &config.initial_primary_path {
                drives.primary_path = Some(PathBuf::from(primary));
                seeded = true;
            }
        }
        if drives.backup_path.is_none() {
            if let Some(backup) = &config.initial_backup_path {
                drives.backup_path = Some(PathBuf::from(backup));
                seeded = true;
            }
        }

        if seeded {
            drives.save(data_path)?;
            info!("Seeded drive config from environment: {:?}", drives);
        }

        Ok(drives)
    }

    /// Writes to a temporary file and renames it so a crash never leaves a torn config.
    pub fn save(&self, data_path: &Path) -> VaultResult<()> {
        fs::create_dir_all(data_path)?;
        let path = data_path.join(DRIVE_CONFIG_FILE);
        let tmp_path = data_path.join(format!("{}.tmp", DRIVE_CONFIG_FILE));

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| VaultError::Config(format!("cannot encode drive config: {}", e)))?;
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub fn require_primary(&self) -> VaultResult<&Path> {
        self.primary_path
            .as_deref()
            .ok_or_else(|| VaultError::Config("primary drive is not configured".to_string()))
    }

    pub fn require_backup(&self) -> VaultResult<&Path> {
        self.backup_path
            .as_deref()
            .ok_or_else(|| VaultError::Config("backup drive is not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_drive_config_is_unconfigured() {
        let temp_dir = TempDir::new().unwrap();
        let drives = DriveConfig::load(temp_dir.path()).unwrap();
        assert_eq!(drives, DriveConfig::default());
        assert!(drives.require_primary().is_err());
        assert!(drives.require_backup().is_err());
    }

    #[test]
    fn test_drive_config_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let drives = DriveConfig {
            primary_path: Some(PathBuf::from("/mnt/photos")),
            backup_path: Some(PathBuf::from("/mnt/backup")),
        };

        drives.save(temp_dir.path()).unwrap();
        let loaded = DriveConfig::load(temp_dir.path()).unwrap();
        assert_eq!(loaded, drives);
        assert!(!temp_dir.path().join("drives.json.tmp").exists());
    }

    #[test]
    fn test_seed_does_not_override_saved_paths() {
        let temp_dir = TempDir::new().unwrap();
        DriveConfig {
            primary_path: Some(PathBuf::from("/saved/primary")),
            backup_path: None,
        }
        .save(temp_dir.path())
        .unwrap();

        let mut config = Config::for_data_path(temp_dir.path());
        config.initial_primary_path = Some("/env/primary".to_string());
        config.initial_backup_path = Some("/env/backup".to_string());

        let drives = DriveConfig::load_or_seed(&config).unwrap();
        assert_eq!(drives.primary_path, Some(PathBuf::from("/saved/primary")));
        assert_eq!(drives.backup_path, Some(PathBuf::from("/env/backup")));
    }

    #[test]
    fn test_corrupt_drive_config_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("drives.json"), "{not json").unwrap();
        assert!(matches!(
            DriveConfig::load(temp_dir.path()),
            Err(VaultError::Config(_))
        ));
    }
}
