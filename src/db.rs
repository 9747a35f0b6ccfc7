use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub use crate::db_pool::{create_db_pool, DbPool};
pub use crate::db_types::{
    format_timestamp, parse_timestamp, DeleteOutcome, FilterCriteria, HashState, PathChange,
    PhotoRecord, UpsertOutcome,
};
use crate::db_pool::{check_integrity, vacuum_database};
use crate::error::{VaultError, VaultResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    // === CORE IDENTIFICATION ===
    pub id: i64,
    pub path: String,
    pub filename: String,
    pub file_size: Option<i64>,
    pub file_modified: Option<DateTime<Utc>>,
    pub format: String,

    // === CONTENT ===
    pub content_hash: Option<String>,
    pub hash_state: HashState,

    // === BEST-EFFORT METADATA ===
    pub date_taken: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,

    pub is_missing: bool,

    // === SYSTEM TIMESTAMPS ===
    pub date_indexed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn required_timestamp(row: &Row, column: &str) -> SqlResult<DateTime<Utc>> {
    let value: String = row.get(column)?;
    parse_timestamp(&value).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(0, column.to_string(), rusqlite::types::Type::Text)
    })
}

fn optional_timestamp(row: &Row, column: &str) -> SqlResult<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(column)?
        .and_then(|s| parse_timestamp(&s)))
}

impl Photo {
    pub fn from_row(row: &Row) -> SqlResult<Self> {
        Ok(Photo {
            id: row.get("id")?,
            path: row.get("path")?,
            filename: row.get("filename")?,
            file_size: row.get("file_size")?,
            file_modified: optional_timestamp(row, "file_modified")?,
            format: row.get("format")?,
            content_hash: row.get("content_hash")?,
            hash_state: HashState::parse(&row.get::<_, String>("hash_state")?),
            date_taken: optional_timestamp(row, "date_taken")?,
            width: row.get("width")?,
            height: row.get("height")?,
            is_missing: row.get("is_missing")?,
            date_indexed: required_timestamp(row, "date_indexed")?,
            created_at: required_timestamp(row, "created_at")?,
            updated_at: required_timestamp(row, "updated_at")?,
        })
    }
}

fn collect_photos(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> SqlResult<Vec<Photo>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, Photo::from_row)?;
    rows.collect()
}

/// The catalog store. Cheap to clone; clones share the pool, the generation
/// counter and the corruption flag.
#[derive(Clone)]
pub struct Catalog {
    pool: DbPool,
    generation: Arc<AtomicU64>,
    corrupted: Arc<AtomicBool>,
}

impl Catalog {
    pub fn open(db_path: &str) -> VaultResult<Self> {
        let pool = create_db_pool(db_path)?;
        let catalog = Self::from_pool(pool);
        if let Some(problem) = check_integrity(&catalog.pool)? {
            catalog.mark_corrupted(&problem);
        }
        info!("Catalog opened at {}", db_path);
        Ok(catalog)
    }

    pub fn from_pool(pool: DbPool) -> Self {
        Catalog {
            pool,
            generation: Arc::new(AtomicU64::new(0)),
            corrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Incremented by every committed mutation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_corrupted(&self, reason: &str) {
        if !self.corrupted.swap(true, Ordering::SeqCst) {
            error!("Catalog storage corruption detected, halting mutations: {}", reason);
        }
    }

    /// Clears the corrupted state if SQLite's integrity check passes again.
    pub fn recover(&self) -> VaultResult<()> {
        match check_integrity(&self.pool)? {
            None => {
                if self.corrupted.swap(false, Ordering::SeqCst) {
                    info!("Catalog integrity restored, mutations re-enabled");
                }
                Ok(())
            }
            Some(problem) => {
                self.mark_corrupted(&problem);
                Err(VaultError::Corrupted(problem))
            }
        }
    }

    fn observe<T>(&self, result: VaultResult<T>) -> VaultResult<T> {
        if let Err(e) = &result {
            if e.is_storage_corruption() {
                self.mark_corrupted(&e.to_string());
            }
        }
        result
    }

    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> VaultResult<T>) -> VaultResult<T> {
        let result = match self.pool.get() {
            Ok(conn) => f(&*conn),
            Err(e) => Err(e.into()),
        };
        self.observe(result)
    }

    /// Runs `f` in an IMMEDIATE transaction. The flag returned alongside the value
    /// says whether anything was written; only then is the generation bumped.
    pub(crate) fn write_if<T>(
        &self,
        f: impl FnOnce(&Transaction) -> VaultResult<(T, bool)>,
    ) -> VaultResult<T> {
        if self.is_corrupted() {
            return Err(VaultError::Corrupted(
                "catalog refused mutation until recovery".to_string(),
            ));
        }

        let result = (|| -> VaultResult<T> {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let (value, changed) = f(&tx)?;
            tx.commit()?;
            if changed {
                self.generation.fetch_add(1, Ordering::SeqCst);
            }
            Ok(value)
        })();
        self.observe(result)
    }

    pub(crate) fn write<T>(&self, f: impl FnOnce(&Transaction) -> VaultResult<T>) -> VaultResult<T> {
        self.write_if(|tx| f(tx).map(|value| (value, true)))
    }

    // ===== PHOTOS =====

    /// Inserts or updates by path. A size or mtime change resets the content hash.
    pub fn upsert_photo(&self, record: &PhotoRecord) -> VaultResult<UpsertOutcome> {
        self.write_if(|tx| {
            let now = format_timestamp(&Utc::now());
            let existing = tx
                .query_row(
                    "SELECT * FROM photos WHERE path = ?",
                    [&record.path],
                    Photo::from_row,
                )
                .optional()?;

            let Some(existing) = existing else {
                tx.execute(
                    r#"
                    INSERT INTO photos (
                        path, filename, file_size, file_modified, format,
                        content_hash, hash_state, date_taken, width, height,
                        is_missing, date_indexed, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, 'stale', ?6, ?7, ?8, 0, ?9, ?9, ?9)
                    "#,
                    params![
                        record.path,
                        record.filename,
                        record.file_size,
                        format_timestamp(&record.file_modified),
                        record.format,
                        record.date_taken.as_ref().map(format_timestamp),
                        record.width,
                        record.height,
                        now,
                    ],
                )?;
                let outcome = UpsertOutcome {
                    id: tx.last_insert_rowid(),
                    inserted: true,
                    changed: true,
                };
                return Ok((outcome, true));
            };

            let content_changed = existing.file_size != Some(record.file_size)
                || existing.file_modified != Some(record.file_modified);
            let metadata_changed = existing.filename != record.filename
                || existing.format != record.format
                || existing.date_taken != record.date_taken
                || existing.width != record.width
                || existing.height != record.height;

            if !content_changed && !metadata_changed {
                let outcome = UpsertOutcome {
                    id: existing.id,
                    inserted: false,
                    changed: false,
                };
                return Ok((outcome, false));
            }

            if content_changed {
                tx.execute(
                    r#"
                    UPDATE photos SET
                        filename = ?, file_size = ?, file_modified = ?, format = ?,
                        date_taken = ?, width = ?, height = ?,
                        content_hash = NULL, hash_state = 'stale',
                        date_indexed = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                    params![
                        record.filename,
                        record.file_size,
                        format_timestamp(&record.file_modified),
                        record.format,
                        record.date_taken.as_ref().map(format_timestamp),
                        record.width,
                        record.height,
                        now,
                        now,
                        existing.id,
                    ],
                )?;
            } else {
                tx.execute(
                    r#"
                    UPDATE photos SET
                        filename = ?, format = ?, date_taken = ?, width = ?, height = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                    params![
                        record.filename,
                        record.format,
                        record.date_taken.as_ref().map(format_timestamp),
                        record.width,
                        record.height,
                        now,
                        existing.id,
                    ],
                )?;
            }

            let outcome = UpsertOutcome {
                id: existing.id,
                inserted: false,
                changed: true,
            };
            Ok((outcome, true))
        })
    }

    pub fn list_photos(&self, limit: i64, offset: i64) -> VaultResult<Vec<Photo>> {
        self.read(|conn| {
            Ok(collect_photos(
                conn,
                "SELECT * FROM photos ORDER BY id LIMIT ? OFFSET ?",
                params![limit, offset],
            )?)
        })
    }

    /// Cursor pagination: photos with an id greater than `after_id`.
    pub fn list_photos_after(&self, after_id: i64, limit: i64) -> VaultResult<Vec<Photo>> {
        self.read(|conn| {
            Ok(collect_photos(
                conn,
                "SELECT * FROM photos WHERE id > ? ORDER BY id LIMIT ?",
                params![after_id, limit],
            )?)
        })
    }

    pub fn count_photos(&self) -> VaultResult<i64> {
        self.read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?))
    }

    pub fn find_by_id(&self, id: i64) -> VaultResult<Option<Photo>> {
        self.read(|conn| {
            Ok(conn
                .query_row("SELECT * FROM photos WHERE id = ?", [id], Photo::from_row)
                .optional()?)
        })
    }

    pub fn find_by_path(&self, path: &str) -> VaultResult<Option<Photo>> {
        self.read(|conn| {
            Ok(conn
                .query_row("SELECT * FROM photos WHERE path = ?", [path], Photo::from_row)
                .optional()?)
        })
    }

    pub fn list_all_paths(&self) -> VaultResult<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT path FROM photos ORDER BY path")?;
            let paths = stmt
                .query_map([], |row| row.get(0))?
                .collect::<SqlResult<Vec<String>>>()?;
            Ok(paths)
        })
    }

    /// Photos the last complete scan saw on disk.
    pub fn list_present_photos(&self) -> VaultResult<Vec<Photo>> {
        self.read(|conn| {
            Ok(collect_photos(
                conn,
                "SELECT * FROM photos WHERE is_missing = 0 ORDER BY id",
                &[],
            )?)
        })
    }

    /// Removes the rows, their album and tag membership, and any Pending sync
    /// operation derived from them. An unknown id fails the whole request.
    pub fn delete_photos(&self, photo_ids: &[i64]) -> VaultResult<DeleteOutcome> {
        self.write_if(|tx| {
            let outcome = delete_photo_rows(tx, photo_ids)?;
            let changed = !outcome.removed_ids.is_empty();
            Ok((outcome, changed))
        })
    }

    /// Deletes duplicate copies. Group membership is re-read inside the same
    /// transaction as the delete: every id must share its hash with another
    /// present photo, and every hash must keep at least one survivor.
    pub fn delete_duplicate_photos(&self, photo_ids: &[i64]) -> VaultResult<DeleteOutcome> {
        self.write_if(|tx| {
            let requested: BTreeSet<i64> = photo_ids.iter().copied().collect();
            let mut requested_per_hash: BTreeMap<String, usize> = BTreeMap::new();
            for &id in &requested {
                let row = tx
                    .query_row(
                        "SELECT content_hash, hash_state, is_missing FROM photos WHERE id = ?",
                        [id],
                        |row| {
                            Ok((
                                row.get::<_, Option<String>>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, bool>(2)?,
                            ))
                        },
                    )
                    .optional()?
                    .ok_or_else(|| VaultError::NotFound(format!("photo {} not found", id)))?;
                match row {
                    (Some(hash), state, false) if state == HashState::Known.as_str() => {
                        *requested_per_hash.entry(hash).or_default() += 1;
                    }
                    _ => {
                        return Err(VaultError::InvalidInput(format!(
                            "photo {} is not part of any duplicate group",
                            id
                        )))
                    }
                }
            }

            for (hash, requested_count) in &requested_per_hash {
                let members: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM photos WHERE content_hash = ? AND hash_state = 'known' AND is_missing = 0",
                    [hash],
                    |row| row.get(0),
                )?;
                if members < 2 {
                    return Err(VaultError::InvalidInput(format!(
                        "no duplicates share the hash {}",
                        hash
                    )));
                }
                if *requested_count as i64 >= members {
                    return Err(VaultError::InvalidInput(format!(
                        "refusing to delete every copy of {}",
                        hash
                    )));
                }
            }

            let ids: Vec<i64> = requested.into_iter().collect();
            let outcome = delete_photo_rows(tx, &ids)?;
            let changed = !outcome.removed_ids.is_empty();
            Ok((outcome, changed))
        })
    }

    /// Points photos at new paths. Content, hash and memberships stay with the
    /// photo id; Pending operations for the old path are dropped and the next
    /// reconciliation derives the backup side. A target path already held by
    /// another photo fails the whole batch with `Conflict`.
    pub fn relocate_photos(&self, changes: &[PathChange]) -> VaultResult<Vec<Photo>> {
        self.write_if(|tx| {
            let now = format_timestamp(&Utc::now());
            let mut targets = BTreeSet::new();
            for change in changes {
                if !targets.insert(change.to.as_str()) {
                    return Err(VaultError::Conflict(format!(
                        "two photos cannot both move to {}",
                        change.to
                    )));
                }
            }

            let mut moved = Vec::with_capacity(changes.len());
            for change in changes {
                let exists = tx
                    .query_row("SELECT 1 FROM photos WHERE id = ?", [change.photo_id], |_| Ok(()))
                    .optional()?;
                if exists.is_none() {
                    return Err(VaultError::NotFound(format!("photo {} not found", change.photo_id)));
                }
                let holder = tx
                    .query_row(
                        "SELECT id FROM photos WHERE path = ? AND id != ?",
                        params![change.to, change.photo_id],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?;
                if let Some(holder) = holder {
                    return Err(VaultError::Conflict(format!(
                        "{} is already cataloged as photo {}",
                        change.to, holder
                    )));
                }

                let filename = change.to.rsplit('/').next().unwrap_or(&change.to);
                tx.execute(
                    "UPDATE photos SET path = ?, filename = ?, updated_at = ? WHERE id = ?",
                    params![change.to, filename, now, change.photo_id],
                )?;
                tx.execute(
                    "DELETE FROM sync_operations WHERE photo_id = ? AND status = 'pending'",
                    [change.photo_id],
                )?;
                let photo = tx.query_row(
                    "SELECT * FROM photos WHERE id = ?",
                    [change.photo_id],
                    Photo::from_row,
                )?;
                moved.push(photo);
            }

            let changed = !moved.is_empty();
            Ok((moved, changed))
        })
    }

    // ===== HASH BOOKKEEPING =====

    pub fn photos_needing_hash(&self) -> VaultResult<Vec<Photo>> {
        self.read(|conn| {
            Ok(collect_photos(
                conn,
                "SELECT * FROM photos WHERE hash_state = 'stale' AND is_missing = 0 ORDER BY id",
                &[],
            )?)
        })
    }

    /// Stores a computed hash. Applies only while the row is still Stale with the
    /// same (size, mtime) observation the hash was computed against.
    pub fn set_content_hash(
        &self,
        id: i64,
        hash: &str,
        observed_size: i64,
        observed_mtime: &DateTime<Utc>,
    ) -> VaultResult<bool> {
        self.write_if(|tx| {
            let updated = tx.execute(
                r#"
                UPDATE photos SET content_hash = ?, hash_state = 'known', updated_at = ?
                WHERE id = ? AND hash_state = 'stale' AND file_size = ? AND file_modified = ?
                "#,
                params![
                    hash,
                    format_timestamp(&Utc::now()),
                    id,
                    observed_size,
                    format_timestamp(observed_mtime),
                ],
            )?;
            if updated == 0 {
                warn!("Discarded hash for photo {}: observation changed", id);
            }
            Ok((updated > 0, updated > 0))
        })
    }

    pub fn mark_hash_unknown(&self, id: i64) -> VaultResult<bool> {
        self.write_if(|tx| {
            let updated = tx.execute(
                "UPDATE photos SET hash_state = 'unknown', updated_at = ? WHERE id = ? AND hash_state = 'stale'",
                params![format_timestamp(&Utc::now()), id],
            )?;
            Ok((updated > 0, updated > 0))
        })
    }

    /// Present photos with a known hash, ordered by hash then id.
    pub fn list_hashed_photos(&self) -> VaultResult<Vec<Photo>> {
        self.read(|conn| {
            Ok(collect_photos(
                conn,
                "SELECT * FROM photos WHERE hash_state = 'known' AND is_missing = 0 ORDER BY content_hash, id",
                &[],
            )?)
        })
    }

    // ===== SCAN BOOKKEEPING =====

    pub fn mark_missing(&self, paths: &[String]) -> VaultResult<usize> {
        self.write_if(|tx| {
            let now = format_timestamp(&Utc::now());
            let mut flagged = 0;
            for path in paths {
                flagged += tx.execute(
                    "UPDATE photos SET is_missing = 1, updated_at = ? WHERE path = ? AND is_missing = 0",
                    params![now, path],
                )?;
            }
            Ok((flagged, flagged > 0))
        })
    }

    pub fn restore_present(&self, id: i64) -> VaultResult<bool> {
        self.write_if(|tx| {
            let updated = tx.execute(
                "UPDATE photos SET is_missing = 0, updated_at = ? WHERE id = ? AND is_missing = 1",
                params![format_timestamp(&Utc::now()), id],
            )?;
            Ok((updated > 0, updated > 0))
        })
    }

    // ===== FILTERING =====

    pub fn filter_photos(&self, criteria: &FilterCriteria) -> VaultResult<Vec<Photo>> {
        self.read(|conn| {
            let mut where_clause = String::from(" WHERE 1=1");
            let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(date_from) = &criteria.date_from {
                where_clause.push_str(" AND date_taken >= ?");
                params.push(Box::new(format_timestamp(date_from)));
            }
            if let Some(date_to) = &criteria.date_to {
                where_clause.push_str(" AND date_taken <= ?");
                params.push(Box::new(format_timestamp(date_to)));
            }
            if let Some(min_width) = criteria.min_width {
                where_clause.push_str(" AND width >= ?");
                params.push(Box::new(min_width));
            }
            if let Some(min_height) = criteria.min_height {
                where_clause.push_str(" AND height >= ?");
                params.push(Box::new(min_height));
            }
            if let Some(query) = criteria.query.as_deref().filter(|q| !q.trim().is_empty()) {
                where_clause.push_str(" AND filename LIKE ?");
                params.push(Box::new(format!("%{}%", query.trim())));
            }
            if !criteria.tags.is_empty() {
                let placeholders = vec!["?"; criteria.tags.len()].join(", ");
                where_clause.push_str(&format!(
                    " AND id IN (SELECT photo_id FROM photo_tags WHERE tag_id IN ({}))",
                    placeholders
                ));
                for tag_id in &criteria.tags {
                    params.push(Box::new(*tag_id));
                }
            }
            if !criteria.albums.is_empty() {
                let placeholders = vec!["?"; criteria.albums.len()].join(", ");
                where_clause.push_str(&format!(
                    " AND id IN (SELECT photo_id FROM album_photos WHERE album_id IN ({}))",
                    placeholders
                ));
                for album_id in &criteria.albums {
                    params.push(Box::new(*album_id));
                }
            }

            let query = format!("SELECT * FROM photos{} ORDER BY id", where_clause);
            let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
            Ok(collect_photos(conn, &query, &param_refs)?)
        })
    }

    // ===== MAINTENANCE =====

    pub fn vacuum(&self) -> VaultResult<()> {
        if self.is_corrupted() {
            return Err(VaultError::Corrupted(
                "vacuum refused until recovery".to_string(),
            ));
        }
        let result = vacuum_database(&self.pool);
        self.observe(result)
    }
}

/// Validates every id first so that an unknown one leaves nothing deleted.
fn delete_photo_rows(tx: &Transaction, photo_ids: &[i64]) -> VaultResult<DeleteOutcome> {
    let requested: BTreeSet<i64> = photo_ids.iter().copied().collect();
    let mut rows = Vec::with_capacity(requested.len());
    for &id in &requested {
        let (path, size) = tx
            .query_row(
                "SELECT path, file_size FROM photos WHERE id = ?",
                [id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?)),
            )
            .optional()?
            .ok_or_else(|| VaultError::NotFound(format!("photo {} not found", id)))?;
        rows.push((id, path, size));
    }

    let mut outcome = DeleteOutcome::default();
    for (id, path, size) in rows {
        tx.execute(
            "DELETE FROM sync_operations WHERE photo_id = ? AND status = 'pending'",
            [id],
        )?;
        tx.execute("DELETE FROM photos WHERE id = ?", [id])?;

        outcome.removed_ids.push(id);
        outcome.removed_paths.push(path);
        outcome.bytes_freed += size.unwrap_or(0).max(0) as u64;
    }

    if !outcome.removed_ids.is_empty() {
        tx.execute(
            "DELETE FROM tags WHERE id NOT IN (SELECT tag_id FROM photo_tags)",
            [],
        )?;
    }
    Ok(outcome)
}
