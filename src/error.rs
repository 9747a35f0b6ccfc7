use rusqlite::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Catalog conflict: {0}")]
    Conflict(String),
    #[error("Hash error: {0}")]
    Hash(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Catalog storage is corrupted, mutations are halted: {0}")]
    Corrupted(String),
    #[error("Background task failed: {0}")]
    Task(String),
}

pub type VaultResult<T> = Result<T, VaultError>;

impl VaultError {
    /// True when SQLite reports the database file itself as damaged.
    pub fn is_storage_corruption(&self) -> bool {
        match self {
            VaultError::Database(e) => matches!(
                e.sqlite_error_code(),
                Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase)
            ),
            VaultError::Corrupted(_) => true,
            _ => false,
        }
    }

    /// Errors worth retrying later: I/O and lock contention, not constraint failures.
    pub fn is_transient(&self) -> bool {
        match self {
            VaultError::Io(_) | VaultError::Hash(_) | VaultError::Pool(_) => true,
            VaultError::Database(e) => matches!(
                e.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(e: tokio::task::JoinError) -> Self {
        VaultError::Task(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_errors_are_not_transient() {
        assert!(!VaultError::NotFound("album 3".to_string()).is_transient());
        assert!(!VaultError::InvalidInput("empty name".to_string()).is_transient());
        assert!(VaultError::Io(std::io::Error::other("disk gone")).is_transient());
    }

    #[test]
    fn test_corruption_detection() {
        let corrupt = VaultError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
            None,
        ));
        assert!(corrupt.is_storage_corruption());

        let busy = VaultError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(!busy.is_storage_corruption());
        assert!(busy.is_transient());
    }
}
