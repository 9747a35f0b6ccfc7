//! Request and response shapes for the engine operations exposed by
//! [`crate::vault::PhotoVault`] and the HTTP routes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync_state::DriveStatus;

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Either offset pagination (`limit`, `offset`) or cursor pagination
/// (`after_id`, `limit`). `after_id` wins when both are given.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhotosQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub after_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DrivePathsRequest {
    pub primary: Option<String>,
    pub backup: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriveConfigResponse {
    pub primary_drive: Option<String>,
    pub backup_drive: Option<String>,
    pub primary_status: DriveStatus,
    pub backup_status: DriveStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanRequest {
    pub primary_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanAccepted {
    pub accepted: bool,
    pub root: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhotoIdsRequest {
    pub photo_ids: Vec<i64>,
}

/// `target_dir` is relative to the primary drive, or absolute inside it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovePhotosRequest {
    pub photo_ids: Vec<i64>,
    pub target_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenamePhotoRequest {
    pub new_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAlbumRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagRequest {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BytesFreedResponse {
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryResponse {
    pub requeued: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatusResponse {
    pub primary_connected: bool,
    pub backup_connected: bool,
    pub primary_status: DriveStatus,
    pub backup_status: DriveStatus,
    pub is_in_sync: bool,
    pub is_sync_in_progress: bool,
    pub pending_operations: u64,
    pub last_sync: Option<DateTime<Utc>>,
}
