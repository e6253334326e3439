//! Error types for the storage layer.

use momenty_types::AccountId;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An account with this email already exists.
    #[error("account already exists for {0}")]
    DuplicateEmail(String),

    /// The username is already taken.
    #[error("username already taken: {0}")]
    DuplicateUsername(String),

    /// The token is already held by another account or reservation.
    #[error("token already in use")]
    TokenTaken,

    /// No account with this id.
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// Stored data could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,
}
