use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{format_timestamp, parse_timestamp, Catalog, Photo};
use crate::error::{VaultError, VaultResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    pub name: String,
    /// Member ids, ascending. Membership carries no ordering meaning.
    pub photo_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

fn album_exists(conn: &Connection, album_id: i64) -> VaultResult<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM albums WHERE id = ?", [album_id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn photo_exists(conn: &Connection, photo_id: i64) -> VaultResult<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM photos WHERE id = ?", [photo_id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn album_members(conn: &Connection, album_id: i64) -> VaultResult<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT photo_id FROM album_photos WHERE album_id = ? ORDER BY photo_id")?;
    let ids = stmt
        .query_map([album_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

fn load_album(conn: &Connection, album_id: i64) -> VaultResult<Option<Album>> {
    let row = conn
        .query_row(
            "SELECT id, name, created_at FROM albums WHERE id = ?",
            [album_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((id, name, created_at)) => Ok(Some(Album {
            id,
            name,
            photo_ids: album_members(conn, id)?,
            created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        })),
        None => Ok(None),
    }
}

/// Every id must name an existing photo; reports the first unknown one.
fn require_photos(conn: &Connection, photo_ids: &[i64]) -> VaultResult<()> {
    for &id in photo_ids {
        if !photo_exists(conn, id)? {
            return Err(VaultError::NotFound(format!("photo {}", id)));
        }
    }
    Ok(())
}

impl Catalog {
    // ===== ALBUMS =====

    pub fn create_album(&self, name: &str) -> VaultResult<Album> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VaultError::InvalidInput(
                "album name must not be empty".to_string(),
            ));
        }

        self.write(|tx| {
            let created_at = Utc::now();
            tx.execute(
                "INSERT INTO albums (name, created_at) VALUES (?, ?)",
                params![name, format_timestamp(&created_at)],
            )?;
            Ok(Album {
                id: tx.last_insert_rowid(),
                name: name.to_string(),
                photo_ids: Vec::new(),
                created_at,
            })
        })
    }

    /// Removes the album and its membership rows. Photos are untouched.
    pub fn delete_album(&self, album_id: i64) -> VaultResult<()> {
        self.write(|tx| {
            let deleted = tx.execute("DELETE FROM albums WHERE id = ?", [album_id])?;
            if deleted == 0 {
                return Err(VaultError::NotFound(format!("album {}", album_id)));
            }
            Ok(())
        })
    }

    pub fn list_albums(&self) -> VaultResult<Vec<Album>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM albums ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;

            let mut albums = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(album) = load_album(conn, id)? {
                    albums.push(album);
                }
            }
            Ok(albums)
        })
    }

    pub fn find_album(&self, album_id: i64) -> VaultResult<Option<Album>> {
        self.read(|conn| load_album(conn, album_id))
    }

    /// All-or-nothing: an unknown album or any unknown photo id changes nothing.
    pub fn add_photos_to_album(&self, photo_ids: &[i64], album_id: i64) -> VaultResult<()> {
        self.write_if(|tx| {
            if !album_exists(tx, album_id)? {
                return Err(VaultError::NotFound(format!("album {}", album_id)));
            }
            require_photos(tx, photo_ids)?;

            let now = format_timestamp(&Utc::now());
            let mut added = 0;
            for &photo_id in photo_ids {
                added += tx.execute(
                    "INSERT OR IGNORE INTO album_photos (album_id, photo_id, added_at) VALUES (?, ?, ?)",
                    params![album_id, photo_id, now],
                )?;
            }
            Ok(((), added > 0))
        })
    }

    pub fn remove_photos_from_album(&self, photo_ids: &[i64], album_id: i64) -> VaultResult<()> {
        self.write_if(|tx| {
            if !album_exists(tx, album_id)? {
                return Err(VaultError::NotFound(format!("album {}", album_id)));
            }

            let mut removed = 0;
            for &photo_id in photo_ids {
                removed += tx.execute(
                    "DELETE FROM album_photos WHERE album_id = ? AND photo_id = ?",
                    params![album_id, photo_id],
                )?;
            }
            Ok(((), removed > 0))
        })
    }

    pub fn list_photos_by_album(&self, album_id: i64) -> VaultResult<Vec<Photo>> {
        self.read(|conn| {
            if !album_exists(conn, album_id)? {
                return Err(VaultError::NotFound(format!("album {}", album_id)));
            }
            let mut stmt = conn.prepare(
                r#"
                SELECT p.* FROM photos p
                JOIN album_photos ap ON ap.photo_id = p.id
                WHERE ap.album_id = ?
                ORDER BY p.id
                "#,
            )?;
            let photos = stmt
                .query_map([album_id], Photo::from_row)?
                .collect::<rusqlite::Result<Vec<Photo>>>()?;
            Ok(photos)
        })
    }

    // ===== TAGS =====

    /// Attaches a tag by name, creating it on first use.
    pub fn add_tag(&self, photo_id: i64, name: &str) -> VaultResult<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VaultError::InvalidInput(
                "tag name must not be empty".to_string(),
            ));
        }

        self.write(|tx| {
            if !photo_exists(tx, photo_id)? {
                return Err(VaultError::NotFound(format!("photo {}", photo_id)));
            }

            tx.execute(
                "INSERT INTO tags (name) VALUES (?) ON CONFLICT(name) DO NOTHING",
                [name],
            )?;
            let tag_id: i64 =
                tx.query_row("SELECT id FROM tags WHERE name = ?", [name], |row| row.get(0))?;
            tx.execute(
                "INSERT OR IGNORE INTO photo_tags (photo_id, tag_id) VALUES (?, ?)",
                params![photo_id, tag_id],
            )?;

            Ok(Tag {
                id: tag_id,
                name: name.to_string(),
            })
        })
    }

    /// Detaches a tag; a tag left without photos is deleted.
    pub fn remove_tag(&self, photo_id: i64, tag_id: i64) -> VaultResult<()> {
        self.write_if(|tx| {
            let removed = tx.execute(
                "DELETE FROM photo_tags WHERE photo_id = ? AND tag_id = ?",
                params![photo_id, tag_id],
            )?;
            if removed > 0 {
                tx.execute(
                    "DELETE FROM tags WHERE id = ? AND NOT EXISTS (SELECT 1 FROM photo_tags WHERE tag_id = ?)",
                    params![tag_id, tag_id],
                )?;
            }
            Ok(((), removed > 0))
        })
    }

    pub fn photo_tags(&self, photo_id: i64) -> VaultResult<Vec<Tag>> {
        self.read(|conn| {
            if !photo_exists(conn, photo_id)? {
                return Err(VaultError::NotFound(format!("photo {}", photo_id)));
            }
            let mut stmt = conn.prepare(
                r#"
                SELECT t.id, t.name FROM tags t
                JOIN photo_tags pt ON pt.tag_id = t.id
                WHERE pt.photo_id = ?
                ORDER BY t.name
                "#,
            )?;
            let tags = stmt
                .query_map([photo_id], |row| {
                    Ok(Tag {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<Tag>>>()?;
            Ok(tags)
        })
    }

    pub fn all_tags(&self) -> VaultResult<Vec<Tag>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM tags ORDER BY name")?;
            let tags = stmt
                .query_map([], |row| {
                    Ok(Tag {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<Tag>>>()?;
            Ok(tags)
        })
    }
}
