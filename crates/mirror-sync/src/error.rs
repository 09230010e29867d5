//! Error types for sync operations

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The remote no longer considers a reference point canonical
    #[error("Rollback: {0}")]
    Rollback(String),

    /// Remote indexer could not be reached
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Remote call exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Remote answered with something malformed
    #[error("Remote error: {0}")]
    Remote(String),

    /// Operation cancelled
    #[error("Cancelled")]
    Cancelled,

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[source] mirror_storage_sqlite::Error),

    /// Stored data contradicts a store invariant
    #[error("Store invariant violation: {0}")]
    InvariantViolation(String),

    /// Domain error
    #[error(transparent)]
    Core(#[from] mirror_core::Error),
}

impl Error {
    /// Whether the external scheduler may retry the pass later
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Rollback(_) | Error::RemoteUnavailable(_) | Error::Timeout(_) => true,
            Error::Storage(mirror_storage_sqlite::Error::Database(e)) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}

impl From<mirror_storage_sqlite::Error> for Error {
    fn from(e: mirror_storage_sqlite::Error) -> Self {
        match e {
            mirror_storage_sqlite::Error::InvariantViolation(msg) => Error::InvariantViolation(msg),
            mirror_storage_sqlite::Error::Core(core) => Error::Core(core),
            other => Error::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(mirror_storage_sqlite::Error::Database(e))
    }
}
