use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::db::{format_timestamp, parse_timestamp, Catalog};
use crate::error::{VaultError, VaultResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOpKind {
    Copy,
    Delete,
}

impl SyncOpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Delete => "delete",
        }
    }
}

impl std::str::FromStr for SyncOpKind {
    type Err = VaultError;

    fn from_str(s: &str) -> VaultResult<Self> {
        match s {
            "copy" => Ok(Self::Copy),
            "delete" => Ok(Self::Delete),
            _ => Err(VaultError::InvalidInput(format!("unknown sync kind {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOpStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

impl SyncOpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InFlight)
    }
}

impl std::str::FromStr for SyncOpStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> VaultResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(VaultError::InvalidInput(format!("unknown sync status {}", s))),
        }
    }
}

/// A unit of work that brings one backup path in line with the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: i64,
    pub kind: SyncOpKind,
    /// None for deletes of files that only exist on the backup.
    pub photo_id: Option<i64>,
    pub path: String,
    pub content_hash: Option<String>,
    pub status: SyncOpStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncOperation {
    pub kind: SyncOpKind,
    pub photo_id: Option<i64>,
    pub path: String,
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: u64,
    pub in_flight: u64,
}

/// Result of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub status: SyncOpStatus,
    pub attempt_count: u32,
}

fn conversion_error(e: VaultError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

impl SyncOperation {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let timestamp = |column: &str| -> rusqlite::Result<DateTime<Utc>> {
            let value: String = row.get(column)?;
            parse_timestamp(&value).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(0, column.to_string(), rusqlite::types::Type::Text)
            })
        };

        Ok(SyncOperation {
            id: row.get("id")?,
            kind: row
                .get::<_, String>("kind")?
                .parse()
                .map_err(conversion_error)?,
            photo_id: row.get("photo_id")?,
            path: row.get("path")?,
            content_hash: row.get("content_hash")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .map_err(conversion_error)?,
            attempt_count: row.get("attempt_count")?,
            last_error: row.get("last_error")?,
            enqueued_at: timestamp("enqueued_at")?,
            updated_at: timestamp("updated_at")?,
            completed_at: row
                .get::<_, Option<String>>("completed_at")?
                .and_then(|s| parse_timestamp(&s)),
        })
    }
}

fn query_operations(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> rusqlite::Result<Vec<SyncOperation>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, SyncOperation::from_row)?;
    rows.collect()
}

fn path_is_active(conn: &Connection, path: &str) -> VaultResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM sync_operations WHERE path = ? AND status IN ('pending', 'in_flight') LIMIT 1",
            [path],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

// Queue bookkeeping does not touch photo content, so none of these bump the
// catalog generation.
impl Catalog {
    /// Persists a batch in one transaction. Paths that already have an active
    /// operation are skipped; returns the ids actually inserted.
    pub fn enqueue_sync_operations(&self, ops: &[NewSyncOperation]) -> VaultResult<Vec<i64>> {
        self.write_if(|tx| {
            let now = format_timestamp(&Utc::now());
            let mut ids = Vec::with_capacity(ops.len());
            for op in ops {
                if path_is_active(tx, &op.path)? {
                    continue;
                }
                tx.execute(
                    r#"
                    INSERT INTO sync_operations (
                        kind, photo_id, path, content_hash, status, attempt_count,
                        enqueued_at, updated_at
                    ) VALUES (?, ?, ?, ?, 'pending', 0, ?, ?)
                    "#,
                    params![
                        op.kind.as_str(),
                        op.photo_id,
                        op.path,
                        op.content_hash,
                        now,
                        now
                    ],
                )?;
                ids.push(tx.last_insert_rowid());
            }
            Ok((ids, false))
        })
    }

    /// Startup recovery: anything left InFlight by a previous process is requeued.
    pub fn recover_in_flight(&self) -> VaultResult<usize> {
        self.write_if(|tx| {
            let recovered = tx.execute(
                "UPDATE sync_operations SET status = 'pending', updated_at = ? WHERE status = 'in_flight'",
                [format_timestamp(&Utc::now())],
            )?;
            Ok((recovered, false))
        })
    }

    pub fn pending_sync_operations(&self) -> VaultResult<Vec<SyncOperation>> {
        self.read(|conn| {
            Ok(query_operations(
                conn,
                "SELECT * FROM sync_operations WHERE status = 'pending' ORDER BY id",
                &[],
            )?)
        })
    }

    pub fn list_sync_operations(&self) -> VaultResult<Vec<SyncOperation>> {
        self.read(|conn| {
            Ok(query_operations(
                conn,
                "SELECT * FROM sync_operations ORDER BY id",
                &[],
            )?)
        })
    }

    pub fn find_sync_operation(&self, id: i64) -> VaultResult<Option<SyncOperation>> {
        self.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM sync_operations WHERE id = ?",
                    [id],
                    SyncOperation::from_row,
                )
                .optional()?)
        })
    }

    /// Claims a Pending operation. False when it was cancelled or claimed meanwhile.
    pub fn mark_sync_in_flight(&self, id: i64) -> VaultResult<bool> {
        self.transition(id, "in_flight", "status = 'pending'")
    }

    pub fn mark_sync_completed(&self, id: i64) -> VaultResult<bool> {
        self.write_if(|tx| {
            let now = format_timestamp(&Utc::now());
            let updated = tx.execute(
                r#"
                UPDATE sync_operations
                SET status = 'completed', last_error = NULL, updated_at = ?, completed_at = ?
                WHERE id = ? AND status = 'in_flight'
                "#,
                params![now, now, id],
            )?;
            Ok((updated > 0, false))
        })
    }

    /// Returns an interrupted operation to Pending without spending an attempt.
    pub fn revert_sync_pending(&self, id: i64) -> VaultResult<bool> {
        self.transition(id, "pending", "status = 'in_flight'")
    }

    /// Counts one failed attempt; the operation becomes Failed once `max_attempts` is reached.
    pub fn record_sync_failure(
        &self,
        id: i64,
        error: &str,
        max_attempts: u32,
    ) -> VaultResult<AttemptOutcome> {
        self.write_if(|tx| {
            let attempts: u32 = tx
                .query_row(
                    "SELECT attempt_count FROM sync_operations WHERE id = ?",
                    [id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| VaultError::NotFound(format!("sync operation {}", id)))?;

            let attempt_count = attempts + 1;
            let status = if attempt_count >= max_attempts {
                SyncOpStatus::Failed
            } else {
                SyncOpStatus::Pending
            };

            tx.execute(
                r#"
                UPDATE sync_operations
                SET status = ?, attempt_count = ?, last_error = ?, updated_at = ?
                WHERE id = ?
                "#,
                params![
                    status.as_str(),
                    attempt_count,
                    error,
                    format_timestamp(&Utc::now()),
                    id
                ],
            )?;
            Ok((
                AttemptOutcome {
                    status,
                    attempt_count,
                },
                false,
            ))
        })
    }

    fn transition(&self, id: i64, to: &str, guard: &str) -> VaultResult<bool> {
        let sql = format!(
            "UPDATE sync_operations SET status = ?, updated_at = ? WHERE id = ? AND {}",
            guard
        );
        self.write_if(|tx| {
            let updated = tx.execute(&sql, params![to, format_timestamp(&Utc::now()), id])?;
            Ok((updated > 0, false))
        })
    }

    pub fn sync_queue_counts(&self) -> VaultResult<QueueCounts> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM sync_operations WHERE status IN ('pending', 'in_flight') GROUP BY status",
            )?;
            let mut counts = QueueCounts::default();
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                match status.as_str() {
                    "pending" => counts.pending = count as u64,
                    _ => counts.in_flight = count as u64,
                }
            }
            Ok(counts)
        })
    }

    /// Paths with a Pending or InFlight operation.
    pub fn active_sync_paths(&self) -> VaultResult<HashSet<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT path FROM sync_operations WHERE status IN ('pending', 'in_flight')",
            )?;
            let paths = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<HashSet<String>>>()?;
            Ok(paths)
        })
    }

    pub fn failed_sync_operations(&self) -> VaultResult<Vec<SyncOperation>> {
        self.read(|conn| {
            Ok(query_operations(
                conn,
                "SELECT * FROM sync_operations WHERE status = 'failed' ORDER BY id",
                &[],
            )?)
        })
    }

    /// Requeues Failed operations with a fresh attempt budget. A failed operation whose
    /// path has since gained another active operation is left alone.
    pub fn retry_failed_sync_operations(&self) -> VaultResult<usize> {
        self.write_if(|tx| {
            let failed = query_operations(
                tx,
                "SELECT * FROM sync_operations WHERE status = 'failed' ORDER BY id",
                &[],
            )?;
            let now = format_timestamp(&Utc::now());
            let mut requeued = 0;
            for op in failed {
                if path_is_active(tx, &op.path)? {
                    continue;
                }
                requeued += tx.execute(
                    "UPDATE sync_operations SET status = 'pending', attempt_count = 0, updated_at = ? WHERE id = ?",
                    params![now, op.id],
                )?;
            }
            Ok((requeued, false))
        })
    }

    pub fn prune_completed_sync_operations(&self, older_than: DateTime<Utc>) -> VaultResult<usize> {
        self.write_if(|tx| {
            let pruned = tx.execute(
                "DELETE FROM sync_operations WHERE status = 'completed' AND completed_at < ?",
                [format_timestamp(&older_than)],
            )?;
            Ok((pruned, false))
        })
    }
}
