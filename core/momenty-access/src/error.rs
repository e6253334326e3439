//! Error types for the access lifecycle.

use momenty_storage::StorageError;
use momenty_types::AccountId;
use thiserror::Error;

/// Errors produced by the lifecycle engine.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The identity backing store refused to create the account.
    #[error("identity creation failed: {0}")]
    IdentityCreation(String),

    /// The buyer email could not be normalized.
    #[error("invalid email: {0}")]
    InvalidEmail(String),

    /// No account with this id.
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// Every generated token collided.
    #[error("no free token after {0} attempts")]
    TokenSpaceExhausted(u32),

    /// Extending the account would push its expiry past the representable
    /// date range.
    #[error("expiry out of range for account {0}")]
    ExpiryOutOfRange(AccountId),

    /// A blocking store call panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// Configuration is missing or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The mail sink rejected a message.
    #[error("mail delivery failed: {0}")]
    Mail(String),

    /// Backing store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for access operations.
pub type AccessResult<T> = Result<T, AccessError>;
