//! Error types for the persistence store.

use thiserror::Error;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted JSON column could not be decoded.
    #[error("corrupt persisted state: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// A persisted status string is not a known status.
    #[error("invalid persisted status: {0}")]
    InvalidStatus(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
