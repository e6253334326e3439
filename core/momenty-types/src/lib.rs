//! Core type definitions for Momenty access.
//!
//! This crate defines the plain data shared by the storage backends, the
//! lifecycle engine and the HTTP surface:
//! - Account identifiers (UUID v7) and access tokens
//! - Normalized buyer emails and their fingerprints
//! - Account, entitlement and pending-token records
//! - The inbound "purchase completed" event

mod email;
mod event;
mod ids;
mod records;

pub use email::NormalizedEmail;
pub use event::{LineItem, ProductId, PurchaseCompleted};
pub use ids::{AccountId, Token};
pub use records::{Account, Entitlement, PendingToken, SubscriberRecord, SECONDS_PER_DAY};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid email: {0}")]
    InvalidEmail(String),
}
