//! Rate Limit Error Types
//!
//! Errors raised by the quota store and the admission controller. A user with
//! zero quota is a normal denial, not an error.

use super::quota::UserId;

/// Error types for quota store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite failure (I/O, locking, constraint)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record missing where the caller expected one
    #[error("No quota record for user {0}")]
    NotFound(UserId),

    /// A thread panicked while holding the store lock
    #[error("Quota store lock poisoned")]
    Poisoned,

    /// Storage temporarily refused the operation
    #[error("Quota store unavailable: {0}")]
    Unavailable(String),
}

/// Error types for admission and recovery operations
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// Underlying store failed; the admission decision could not be made
    #[error("Quota store failure: {0}")]
    Store(#[from] StoreError),

    /// Controller already shut down
    #[error("Admission controller is shut down")]
    ShutDown,
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
