//! Error types

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Stored data contradicts a store invariant
    #[error("Store invariant violation: {0}")]
    InvariantViolation(String),

    /// On-disk or dumped data is newer than this build understands
    #[error("Incompatible schema version {found} (supported up to {supported})")]
    IncompatibleVersion {
        /// Version found
        found: i32,
        /// Highest supported version
        supported: i32,
    },

    /// Domain error
    #[error(transparent)]
    Core(#[from] mirror_core::Error),

    /// Storage error (generic)
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Whether this error indicates a bug in the update logic rather than a
    /// runtime condition
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::InvariantViolation(_))
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
