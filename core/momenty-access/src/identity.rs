//! Identity resolution: buyer email to account.

use crate::error::{AccessError, AccessResult};
use chrono::{DateTime, Utc};
use momenty_storage::{AccessStore, StorageError};
use momenty_types::{Account, AccountId, NormalizedEmail};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

const USERNAME_SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const USERNAME_SUFFIX_LEN: usize = 4;
const USERNAME_ATTEMPTS: usize = 8;
const CREDENTIAL_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()";
const CREDENTIAL_LEN: usize = 12;

/// Maps buyer emails to stable accounts, creating them on first purchase.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn AccessStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn AccessStore>) -> Self {
        Self { store }
    }

    /// Returns the account for `email`, creating it if absent.
    ///
    /// Names are only written on creation; an existing account keeps its
    /// names. A new account is linked to `order_id` on a best-effort basis.
    ///
    /// # Errors
    ///
    /// [`AccessError::IdentityCreation`] when the email is unusable or the
    /// store refuses the new account; [`AccessError::Storage`] when the store
    /// is unavailable.
    pub fn resolve(
        &self,
        email: &str,
        given_name: &str,
        family_name: &str,
        order_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> AccessResult<AccountId> {
        let email = NormalizedEmail::parse(email)
            .map_err(|e| AccessError::IdentityCreation(e.to_string()))?;

        if let Some(existing) = self.store.find_account_by_email(&email)? {
            return Ok(existing.id);
        }

        let mut last_conflict = String::new();
        for _ in 0..USERNAME_ATTEMPTS {
            let account = Account {
                id: AccountId::new(),
                email: email.clone(),
                username: self.unique_username(&email)?,
                given_name: given_name.trim().to_string(),
                family_name: family_name.trim().to_string(),
                created_at: now,
            };

            match self.store.create_account(&account, &credential_digest()) {
                Ok(()) => {
                    info!(account = %account.id, username = %account.username, "created account");
                    if let Some(order_id) = order_id {
                        self.link_order(order_id, account.id);
                    }
                    return Ok(account.id);
                }
                Err(StorageError::DuplicateEmail(_)) => {
                    debug!(email = %email, "lost account creation race, re-resolving");
                    return match self.store.find_account_by_email(&email)? {
                        Some(winner) => Ok(winner.id),
                        None => Err(AccessError::IdentityCreation(format!(
                            "store reported {email} as duplicate but has no such account"
                        ))),
                    };
                }
                Err(StorageError::DuplicateUsername(name)) => {
                    debug!(username = %name, "username taken during creation, retrying");
                    last_conflict = name;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AccessError::IdentityCreation(format!(
            "could not find a free username (last tried {last_conflict:?})"
        )))
    }

    fn unique_username(&self, email: &NormalizedEmail) -> AccessResult<String> {
        let base = username_base(email.local_part());
        if !self.store.username_exists(&base)? {
            return Ok(base);
        }
        let mut rng = rand::thread_rng();
        for _ in 0..USERNAME_ATTEMPTS {
            let candidate = format!(
                "{base}{}",
                random_string(&mut rng, USERNAME_SUFFIX_ALPHABET, USERNAME_SUFFIX_LEN)
            );
            if !self.store.username_exists(&candidate)? {
                return Ok(candidate);
            }
        }
        Err(AccessError::IdentityCreation(format!(
            "no free username derived from {base:?}"
        )))
    }

    fn link_order(&self, order_id: &str, account: AccountId) {
        if let Err(e) = self.store.link_order(order_id, account) {
            warn!(order = %order_id, account = %account, "failed to link order to new account: {e}");
        }
    }
}

/// Lowercased local part restricted to `[a-z0-9._-]`.
fn username_base(local_part: &str) -> String {
    let cleaned: String = local_part
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_alphanumeric() || matches!(*c, '.' | '_' | '-'))
        .collect();
    if cleaned.is_empty() {
        "member".to_string()
    } else {
        cleaned
    }
}

/// Digest of a fresh random credential. The plaintext is never kept.
fn credential_digest() -> String {
    let credential = random_string(&mut rand::thread_rng(), CREDENTIAL_ALPHABET, CREDENTIAL_LEN);
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn random_string<R: Rng + ?Sized>(rng: &mut R, alphabet: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}
