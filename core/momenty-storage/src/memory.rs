//! In-memory backend.
//!
//! Lock order: `accounts` → `tokens` → `pending` → `entitlements` →
//! per-account mutex.

use crate::{AccessStore, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use momenty_types::{
    Account, AccountId, Entitlement, NormalizedEmail, PendingToken, SubscriberRecord, Token,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

#[derive(Default)]
struct Accounts {
    by_id: HashMap<AccountId, Account>,
    by_email: HashMap<String, AccountId>,
    usernames: HashSet<String>,
    credentials: HashMap<AccountId, String>,
    orders: HashMap<String, AccountId>,
}

/// Process-local store with per-account entitlement locks.
#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<Accounts>,
    tokens: RwLock<HashMap<Token, AccountId>>,
    pending: Mutex<HashMap<String, PendingToken>>,
    entitlements: RwLock<HashMap<AccountId, Arc<Mutex<Entitlement>>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entitlement_cell(&self, account: AccountId) -> StorageResult<Arc<Mutex<Entitlement>>> {
        read(&self.entitlements)?
            .get(&account)
            .cloned()
            .ok_or(StorageError::AccountNotFound(account))
    }
}

impl AccessStore for MemoryStore {
    fn find_account_by_email(&self, email: &NormalizedEmail) -> StorageResult<Option<Account>> {
        let accounts = read(&self.accounts)?;
        Ok(accounts
            .by_email
            .get(email.key())
            .and_then(|id| accounts.by_id.get(id))
            .cloned())
    }

    fn account(&self, id: AccountId) -> StorageResult<Option<Account>> {
        Ok(read(&self.accounts)?.by_id.get(&id).cloned())
    }

    fn username_exists(&self, username: &str) -> StorageResult<bool> {
        Ok(read(&self.accounts)?.usernames.contains(username))
    }

    fn create_account(&self, account: &Account, credential_digest: &str) -> StorageResult<()> {
        let mut accounts = write(&self.accounts)?;
        if accounts.by_email.contains_key(account.email.key()) {
            return Err(StorageError::DuplicateEmail(account.email.to_string()));
        }
        if accounts.usernames.contains(&account.username) {
            return Err(StorageError::DuplicateUsername(account.username.clone()));
        }
        // The entitlement must exist before the account becomes visible.
        write(&self.entitlements)?.insert(
            account.id,
            Arc::new(Mutex::new(Entitlement::new(account.id))),
        );
        accounts
            .by_email
            .insert(account.email.key().to_string(), account.id);
        accounts.usernames.insert(account.username.clone());
        accounts
            .credentials
            .insert(account.id, credential_digest.to_string());
        accounts.by_id.insert(account.id, account.clone());
        Ok(())
    }

    fn link_order(&self, order_id: &str, account: AccountId) -> StorageResult<()> {
        let mut accounts = write(&self.accounts)?;
        if !accounts.by_id.contains_key(&account) {
            return Err(StorageError::AccountNotFound(account));
        }
        accounts.orders.insert(order_id.to_string(), account);
        Ok(())
    }

    fn order_account(&self, order_id: &str) -> StorageResult<Option<AccountId>> {
        Ok(read(&self.accounts)?.orders.get(order_id).copied())
    }

    fn find_by_token(&self, token: &Token) -> StorageResult<Option<AccountId>> {
        Ok(read(&self.tokens)?.get(token).copied())
    }

    fn token_in_use(&self, token: &Token) -> StorageResult<bool> {
        if read(&self.tokens)?.contains_key(token) {
            return Ok(true);
        }
        Ok(lock(&self.pending)?.values().any(|p| &p.token == token))
    }

    fn assign_token(&self, account: AccountId, token: &Token) -> StorageResult<Token> {
        let mut tokens = write(&self.tokens)?;
        let cell = self.entitlement_cell(account)?;
        let mut entitlement = lock_entitlement(&cell);
        if let Some(existing) = &entitlement.token {
            return Ok(existing.clone());
        }
        if tokens.get(token).is_some_and(|holder| *holder != account) {
            return Err(StorageError::TokenTaken);
        }
        tokens.insert(token.clone(), account);
        entitlement.token = Some(token.clone());
        Ok(token.clone())
    }

    fn pending_token(&self, fingerprint: &str) -> StorageResult<Option<PendingToken>> {
        Ok(lock(&self.pending)?.get(fingerprint).cloned())
    }

    fn put_pending_token(&self, pending: &PendingToken) -> StorageResult<()> {
        let tokens = read(&self.tokens)?;
        let mut reservations = lock(&self.pending)?;
        let taken_elsewhere = reservations
            .values()
            .any(|p| p.token == pending.token && p.fingerprint != pending.fingerprint);
        if tokens.contains_key(&pending.token) || taken_elsewhere {
            return Err(StorageError::TokenTaken);
        }
        reservations.insert(pending.fingerprint.clone(), pending.clone());
        Ok(())
    }

    fn remove_pending_token(&self, fingerprint: &str) -> StorageResult<()> {
        lock(&self.pending)?.remove(fingerprint);
        Ok(())
    }

    fn purge_pending_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let mut reservations = lock(&self.pending)?;
        let before = reservations.len();
        reservations.retain(|_, p| p.created_at >= cutoff);
        Ok(before - reservations.len())
    }

    fn entitlement(&self, account: AccountId) -> StorageResult<Option<Entitlement>> {
        let Some(cell) = read(&self.entitlements)?.get(&account).cloned() else {
            return Ok(None);
        };
        let entitlement = lock_entitlement(&cell).clone();
        Ok(Some(entitlement))
    }

    fn update_entitlement(
        &self,
        account: AccountId,
        apply: &mut dyn FnMut(&mut Entitlement),
    ) -> StorageResult<Entitlement> {
        let cell = self.entitlement_cell(account)?;
        let mut entitlement = lock_entitlement(&cell);
        let mut draft = entitlement.clone();
        apply(&mut draft);
        draft.account_id = account;
        draft.token = entitlement.token.clone();
        *entitlement = draft;
        Ok(entitlement.clone())
    }

    fn list_subscribers(&self, email_filter: Option<&str>) -> StorageResult<Vec<SubscriberRecord>> {
        let needle = email_filter.map(str::to_lowercase);
        let accounts: Vec<Account> = read(&self.accounts)?
            .by_id
            .values()
            .filter(|a| needle.as_deref().is_none_or(|n| a.email.key().contains(n)))
            .cloned()
            .collect();

        let mut records = Vec::with_capacity(accounts.len());
        for account in &accounts {
            match self.entitlement(account.id) {
                Ok(Some(entitlement)) if entitlement.token.is_some() => {
                    records.push(SubscriberRecord::from_parts(account, &entitlement));
                }
                Ok(_) => debug!(account = %account.id, "no token yet, not listed"),
                Err(e) => warn!(account = %account.id, "skipping unreadable subscriber: {e}"),
            }
        }
        Ok(records)
    }
}

/// Cells are only ever overwritten with a finished draft, so a cell left
/// poisoned by a panicking update still holds its last committed value.
fn lock_entitlement(cell: &Mutex<Entitlement>) -> MutexGuard<'_, Entitlement> {
    cell.lock().unwrap_or_else(|poisoned| {
        cell.clear_poison();
        poisoned.into_inner()
    })
}

fn lock<T>(mutex: &Mutex<T>) -> StorageResult<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| StorageError::LockPoisoned)
}

fn read<T>(lock: &RwLock<T>) -> StorageResult<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| StorageError::LockPoisoned)
}

fn write<T>(lock: &RwLock<T>) -> StorageResult<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| StorageError::LockPoisoned)
}
