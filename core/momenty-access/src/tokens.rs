//! Token issuance and lookup.
//!
//! Tokens are short codes buyers type or paste, drawn from an alphabet
//! without the look-alikes `0 O 1 I`. Uniqueness comes from the store's
//! constraint; a collision just means drawing again.

use crate::config::AccessConfig;
use crate::error::{AccessError, AccessResult};
use crate::identity::random_string;
use chrono::{DateTime, Duration, Utc};
use momenty_storage::{AccessStore, StorageError};
use momenty_types::{AccountId, NormalizedEmail, PendingToken, Token};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Characters a token may contain.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Draws before giving up on finding a free token.
pub const MAX_TOKEN_ATTEMPTS: u32 = 64;

/// Fixed-width random token generator.
#[derive(Debug, Clone, Copy)]
pub struct TokenGenerator {
    length: usize,
}

impl TokenGenerator {
    #[must_use]
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Draws a token from the thread-local RNG.
    #[must_use]
    pub fn generate(&self) -> Token {
        self.generate_with(&mut rand::thread_rng())
    }

    /// Draws a token from `rng`.
    #[must_use]
    pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Token {
        Token::new(random_string(rng, TOKEN_ALPHABET, self.length))
    }
}

/// Issues, reserves and resolves access tokens.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn AccessStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn AccessStore>) -> Self {
        Self { store }
    }

    /// Returns the account's token, issuing one if it has none.
    ///
    /// A live reservation for `email` is used in preference to a new draw.
    /// Whatever reservation exists for the email is cleared afterwards.
    pub fn get_or_issue_token(
        &self,
        account: AccountId,
        email: &str,
        config: &AccessConfig,
        now: DateTime<Utc>,
    ) -> AccessResult<Token> {
        let entitlement = self
            .store
            .entitlement(account)?
            .ok_or(AccessError::AccountNotFound(account))?;
        if let Some(token) = entitlement.token {
            return Ok(token);
        }

        let email =
            NormalizedEmail::parse(email).map_err(|e| AccessError::InvalidEmail(e.to_string()))?;
        let fingerprint = email.fingerprint();

        let reserved = self
            .store
            .pending_token(&fingerprint)?
            .filter(|pending| pending.is_live(now, config.pending_token_ttl()));

        let token = match reserved {
            Some(pending) => match self.store.assign_token(account, &pending.token) {
                Ok(token) => {
                    debug!(account = %account, "attached reserved token");
                    token
                }
                Err(StorageError::TokenTaken) => {
                    warn!(account = %account, "reserved token already issued elsewhere, drawing a new one");
                    self.issue_fresh(account, config)?
                }
                Err(e) => return Err(e.into()),
            },
            None => self.issue_fresh(account, config)?,
        };

        self.store.remove_pending_token(&fingerprint)?;
        Ok(token)
    }

    /// Exact-match lookup. Surrounding whitespace is ignored.
    pub fn find_by_token(&self, token: &str) -> AccessResult<Option<AccountId>> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        Ok(self.store.find_by_token(&Token::new(token))?)
    }

    /// Reserves a token for an email that has no account yet.
    ///
    /// Returns the account's token if the email already has one, or the
    /// existing live reservation. Expired reservations of every email are
    /// dropped first.
    pub fn reserve_token(
        &self,
        email: &str,
        config: &AccessConfig,
        now: DateTime<Utc>,
    ) -> AccessResult<Token> {
        let email =
            NormalizedEmail::parse(email).map_err(|e| AccessError::InvalidEmail(e.to_string()))?;
        self.purge_expired(config.pending_token_ttl(), now)?;

        if let Some(account) = self.store.find_account_by_email(&email)? {
            if let Some(token) = self.store.entitlement(account.id)?.and_then(|e| e.token) {
                return Ok(token);
            }
        }

        let fingerprint = email.fingerprint();
        if let Some(pending) = self.store.pending_token(&fingerprint)? {
            if pending.is_live(now, config.pending_token_ttl()) {
                return Ok(pending.token);
            }
        }

        let generator = TokenGenerator::new(config.token_length);
        for _ in 0..MAX_TOKEN_ATTEMPTS {
            let token = generator.generate();
            if self.store.token_in_use(&token)? {
                debug!("token collision while reserving, drawing again");
                continue;
            }
            let pending = PendingToken {
                fingerprint: fingerprint.clone(),
                token,
                created_at: now,
            };
            match self.store.put_pending_token(&pending) {
                Ok(()) => {
                    info!("reserved token for pending purchase");
                    return Ok(pending.token);
                }
                Err(StorageError::TokenTaken) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AccessError::TokenSpaceExhausted(MAX_TOKEN_ATTEMPTS))
    }

    /// Drops reservations older than `ttl` and returns how many went.
    pub fn purge_expired(&self, ttl: Duration, now: DateTime<Utc>) -> AccessResult<usize> {
        let Some(cutoff) = now.checked_sub_signed(ttl) else {
            return Ok(0);
        };
        let purged = self.store.purge_pending_before(cutoff)?;
        if purged > 0 {
            debug!(purged, "dropped expired token reservations");
        }
        Ok(purged)
    }

    fn issue_fresh(&self, account: AccountId, config: &AccessConfig) -> AccessResult<Token> {
        let generator = TokenGenerator::new(config.token_length);
        for _ in 0..MAX_TOKEN_ATTEMPTS {
            let token = generator.generate();
            if self.store.token_in_use(&token)? {
                debug!(account = %account, "token collision, drawing again");
                continue;
            }
            match self.store.assign_token(account, &token) {
                Ok(assigned) => {
                    if assigned == token {
                        info!(account = %account, "issued token");
                    }
                    return Ok(assigned);
                }
                Err(StorageError::TokenTaken) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AccessError::TokenSpaceExhausted(MAX_TOKEN_ATTEMPTS))
    }
}
