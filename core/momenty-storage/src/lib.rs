//! Persistence for accounts, tokens and entitlements.
//!
//! The lifecycle engine talks to storage only through [`AccessStore`].
//! Two backends are provided:
//!
//! - [`MemoryStore`]: process-local maps with one lock per entitlement, so
//!   writers on different accounts never wait on each other.
//! - [`SqliteStore`]: a durable SQLite file; every read-modify-write runs in
//!   an immediate transaction.
//!
//! Both enforce the same uniqueness rules: one account per email key, one
//! username per account, and one holder per token across issued tokens and
//! pending reservations.

mod error;
mod memory;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use momenty_types::{
    Account, AccountId, Entitlement, NormalizedEmail, PendingToken, SubscriberRecord, Token,
};

/// Storage backend for the access lifecycle.
pub trait AccessStore: Send + Sync {
    // ── Accounts ─────────────────────────────────────────────────

    /// Looks up an account by normalized email.
    fn find_account_by_email(&self, email: &NormalizedEmail) -> StorageResult<Option<Account>>;

    /// Loads an account by id.
    fn account(&self, id: AccountId) -> StorageResult<Option<Account>>;

    /// Returns true if the username is taken.
    fn username_exists(&self, username: &str) -> StorageResult<bool>;

    /// Inserts an account together with an empty entitlement.
    ///
    /// Fails with [`StorageError::DuplicateEmail`] or
    /// [`StorageError::DuplicateUsername`] on a uniqueness conflict.
    fn create_account(&self, account: &Account, credential_digest: &str) -> StorageResult<()>;

    /// Records which account an order belongs to.
    fn link_order(&self, order_id: &str, account: AccountId) -> StorageResult<()>;

    /// Returns the account an order was linked to.
    fn order_account(&self, order_id: &str) -> StorageResult<Option<AccountId>>;

    // ── Tokens ───────────────────────────────────────────────────

    /// Exact-match token lookup.
    fn find_by_token(&self, token: &Token) -> StorageResult<Option<AccountId>>;

    /// Returns true if the token is issued to an account or reserved.
    fn token_in_use(&self, token: &Token) -> StorageResult<bool>;

    /// Sets the account's token unless it already has one.
    ///
    /// Returns the token the account holds after the call, which is the
    /// existing one if another writer got there first. Fails with
    /// [`StorageError::TokenTaken`] if a different account holds `token`.
    fn assign_token(&self, account: AccountId, token: &Token) -> StorageResult<Token>;

    /// Loads the reservation for an email fingerprint, live or not.
    fn pending_token(&self, fingerprint: &str) -> StorageResult<Option<PendingToken>>;

    /// Stores a reservation, replacing any previous one for the fingerprint.
    ///
    /// Fails with [`StorageError::TokenTaken`] if the token is issued or
    /// reserved for another fingerprint.
    fn put_pending_token(&self, pending: &PendingToken) -> StorageResult<()>;

    /// Drops the reservation for a fingerprint. Missing entries are ignored.
    fn remove_pending_token(&self, fingerprint: &str) -> StorageResult<()>;

    /// Drops every reservation created before `cutoff` and returns how many
    /// went.
    fn purge_pending_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize>;

    // ── Entitlements ─────────────────────────────────────────────

    /// Loads an account's entitlement.
    fn entitlement(&self, account: AccountId) -> StorageResult<Option<Entitlement>>;

    /// Applies `apply` to the entitlement as one atomic read-modify-write
    /// and returns the stored result.
    ///
    /// Changes to `token` are discarded; use [`AccessStore::assign_token`].
    fn update_entitlement(
        &self,
        account: AccountId,
        apply: &mut dyn FnMut(&mut Entitlement),
    ) -> StorageResult<Entitlement>;

    /// Returns every account holding a token, joined with its entitlement,
    /// unordered.
    ///
    /// `email_filter` keeps records whose email contains it, ignoring case.
    /// A record that cannot be read is logged and left out rather than
    /// failing the whole listing.
    fn list_subscribers(&self, email_filter: Option<&str>) -> StorageResult<Vec<SubscriberRecord>>;
}
