use rusqlite::{Connection, Result as SqlResult};

// Schema definitions
pub const PHOTOS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS photos (
    -- Core identification
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    file_size INTEGER,
    file_modified TEXT,
    format TEXT NOT NULL,

    -- Content hash: NULL until computed; hash_state is stale | known | unknown
    content_hash TEXT CHECK(content_hash IS NULL OR length(content_hash) = 64),
    hash_state TEXT NOT NULL DEFAULT 'stale',

    -- Best-effort metadata
    date_taken TEXT,
    width INTEGER,
    height INTEGER,

    -- Set when a complete scan no longer finds the file
    is_missing BOOLEAN NOT NULL DEFAULT FALSE,

    -- System timestamps
    date_indexed TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub const ALBUMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS albums (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL CHECK(length(trim(name)) > 0),
    created_at TEXT NOT NULL
)
"#;

pub const ALBUM_PHOTOS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS album_photos (
    album_id INTEGER NOT NULL,
    photo_id INTEGER NOT NULL,
    added_at TEXT NOT NULL,
    PRIMARY KEY (album_id, photo_id),
    FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE,
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
)
"#;

pub const TAGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
)
"#;

pub const PHOTO_TAGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS photo_tags (
    photo_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL,
    PRIMARY KEY (photo_id, tag_id),
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE,
    FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
)
"#;

// photo_id is not a foreign key: operations outlive the photo rows they were
// derived from (an in-flight copy of a just-deleted photo still has to finish or fail).
pub const SYNC_OPERATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sync_operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL CHECK(kind IN ('copy', 'delete')),
    photo_id INTEGER,
    path TEXT NOT NULL,
    content_hash TEXT,
    status TEXT NOT NULL CHECK(status IN ('pending', 'in_flight', 'completed', 'failed')),
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    enqueued_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
)
"#;

pub const SCHEMA_SQL: &[&str] = &[
    PHOTOS_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_photos_content_hash ON photos(content_hash);",
    "CREATE INDEX IF NOT EXISTS idx_photos_hash_state ON photos(hash_state);",
    "CREATE INDEX IF NOT EXISTS idx_photos_date_taken ON photos(date_taken);",
    ALBUMS_TABLE,
    ALBUM_PHOTOS_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_album_photos_photo ON album_photos(photo_id);",
    TAGS_TABLE,
    PHOTO_TAGS_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_photo_tags_tag ON photo_tags(tag_id);",
    SYNC_OPERATIONS_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_sync_operations_status ON sync_operations(status);",
    "CREATE INDEX IF NOT EXISTS idx_sync_operations_path ON sync_operations(path);",
    "CREATE INDEX IF NOT EXISTS idx_sync_operations_photo ON sync_operations(photo_id);",
];

pub fn initialize_schema(conn: &Connection) -> SqlResult<()> {
    for sql in SCHEMA_SQL {
        conn.execute(sql, [])?;
    }
    Ok(())
}
