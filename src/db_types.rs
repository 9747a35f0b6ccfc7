use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Where a photo's content hash stands relative to the file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashState {
    /// Not computed for the current (size, mtime) observation.
    Stale,
    Known,
    /// Hashing failed; excluded from duplicate grouping until the file changes.
    Unknown,
}

impl HashState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashState::Stale => "stale",
            HashState::Known => "known",
            HashState::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "known" => HashState::Known,
            "unknown" => HashState::Unknown,
            _ => HashState::Stale,
        }
    }
}

/// What the scanner observed for one file, ready to be written to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoRecord {
    pub path: String,
    pub filename: String,
    pub file_size: i64,
    pub file_modified: DateTime<Utc>,
    pub format: String,
    pub date_taken: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: i64,
    pub inserted: bool,
    /// False when the stored row already matched and nothing was written.
    pub changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub min_width: Option<u32>,
    pub min_height: Option<u32>,
    /// Filename substring.
    pub query: Option<String>,
    /// Photos carrying any of these tags.
    pub tags: Vec<i64>,
    /// Photos in any of these albums.
    pub albums: Vec<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    pub removed_ids: Vec<i64>,
    pub removed_paths: Vec<String>,
    pub bytes_freed: u64,
}

/// A new location for a cataloged photo, relative to the primary root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    pub photo_id: i64,
    pub to: String,
}

/// Catalog timestamps are stored as RFC 3339 with millisecond precision so that
/// string comparison in SQL matches chronological order.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Filesystem mtimes truncated to the precision the catalog keeps.
pub fn observed_mtime(modified: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(modified).trunc_subsecs(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timestamp_round_trip_keeps_millis() {
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_nanos(1_700_000_000_123_456_789);
        let observed = observed_mtime(mtime);
        let stored = format_timestamp(&observed);
        assert_eq!(stored, "2023-11-14T22:13:20.123Z");
        assert_eq!(parse_timestamp(&stored), Some(observed));
    }

    #[test]
    fn test_hash_state_parse() {
        assert_eq!(HashState::parse("known"), HashState::Known);
        assert_eq!(HashState::parse("unknown"), HashState::Unknown);
        assert_eq!(HashState::parse("garbage"), HashState::Stale);
        assert_eq!(HashState::Known.as_str(), "known");
    }
}
