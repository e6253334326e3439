//! Access lifecycle for Momenty.
//!
//! Turns "purchase completed" events into time-limited access:
//! - Resolving buyer emails to accounts, creating them on first purchase
//! - Issuing one stable access token per account
//! - Stacking access periods on every qualifying purchase
//! - Answering "does this token grant access right now?"
//! - Sending welcome emails and one expiry reminder per access period
//!
//! # Design Principles
//!
//! - **Snapshot configuration**: every operation reads one [`AccessConfig`]
//!   from the [`ConfigHandle`] when it starts
//! - **Atomic per-account updates**: extensions and reminder flags go through
//!   a single read-modify-write in the store
//! - **Tokens never change**: the first token assigned to an account wins
//!
//! # Usage
//!
//! ```ignore
//! let service = AccessService::new(store, ConfigHandle::new(config)?, Arc::new(LogMailer));
//! service.handle_purchase(&event, Utc::now()).await?;
//! let decision = service.check_access(Some("K7MXQ2"), None, Utc::now()).await?;
//! ```

mod access;
mod blocking;
mod config;
mod error;
mod identity;
mod ledger;
mod notify;
mod service;
mod sweeper;
mod tokens;

pub use access::{AccessDecision, AccessEvaluator, CheckResponse, DenyReason};
pub use config::{
    AccessConfig, ConfigHandle, MAX_ACCESS_DAYS, MAX_PENDING_TOKEN_TTL_HOURS, MAX_TOKEN_LENGTH,
    MIN_TOKEN_LENGTH,
};
pub use error::{AccessError, AccessResult};
pub use identity::IdentityResolver;
pub use ledger::{by_expiry, next_expiry, EntitlementLedger};
pub use notify::{access_link, render, LogMailer, Mailer, Message, NotificationRenderer, Recipient};
pub use service::{AccessService, PurchaseOutcome};
pub use sweeper::{ReminderSweeper, SweepReport};
pub use tokens::{TokenGenerator, TokenStore, MAX_TOKEN_ATTEMPTS, TOKEN_ALPHABET};
