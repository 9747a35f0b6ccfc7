pub mod config;
pub mod content_hash;
pub mod db;
pub mod db_albums;
pub mod db_pool;
pub mod db_schema;
pub mod db_sync_ops;
pub mod db_types;
pub mod drive_monitor;
pub mod error;
pub mod file_scanner;
pub mod handlers_album;
pub mod handlers_config;
pub mod handlers_duplicates;
pub mod handlers_health;
pub mod handlers_photo;
pub mod handlers_scan;
pub mod handlers_sync;
pub mod indexer;
pub mod metadata_extractor;
pub mod mimetype_detector;
pub mod photo_relocator;
pub mod reconciler;
pub mod scheduler;
pub mod sync_queue;
pub mod sync_state;
pub mod vault;
pub mod vault_types;
pub mod warp_helpers;

pub use error::{VaultError, VaultResult};
pub use vault::PhotoVault;
