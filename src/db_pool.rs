use log::{error, info};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::db_schema::initialize_schema;
use crate::error::VaultResult;

pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;

// Applied to every pooled connection; foreign keys and busy timeout are per-connection settings.
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;
     PRAGMA temp_store = MEMORY;";

pub fn create_db_pool(database_path: &str) -> VaultResult<DbPool> {
    // Create parent directory if it doesn't exist
    if let Some(parent) = std::path::Path::new(database_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
    let pool = Pool::new(manager)?;

    {
        let conn = pool.get()?;
        // WAL is a database-level setting, so once is enough.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        initialize_schema(&conn)?;
    }

    Ok(pool)
}

/// Runs SQLite's quick integrity check. Returns the first problem reported, if any.
pub fn check_integrity(pool: &DbPool) -> VaultResult<Option<String>> {
    let conn = pool.get()?;
    let result: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if result == "ok" {
        Ok(None)
    } else {
        error!("Catalog integrity check failed: {}", result);
        Ok(Some(result))
    }
}

pub fn vacuum_database(pool: &DbPool) -> VaultResult<()> {
    let conn = pool.get()?;
    conn.execute("VACUUM", [])?;
    info!("Database vacuum completed");
    Ok(())
}

/// Single-connection in-memory pool; each pooled connection would otherwise get its own database.
#[cfg(test)]
pub fn create_in_memory_pool() -> VaultResult<DbPool> {
    let manager =
        SqliteConnectionManager::memory().with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
    let pool = Pool::builder().max_size(1).build(manager)?;

    {
        let conn = pool.get()?;
        initialize_schema(&conn)?;
    }

    Ok(pool)
}
