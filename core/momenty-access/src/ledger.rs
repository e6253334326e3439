//! Entitlement ledger: expiry arithmetic and reminder bookkeeping.

use crate::error::{AccessError, AccessResult};
use chrono::{DateTime, Duration, Utc};
use momenty_storage::AccessStore;
use momenty_types::{AccountId, Entitlement, SubscriberRecord};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Expiry after one extension, or `None` if it falls outside chrono's range.
///
/// Time left on an active entitlement is kept; a lapsed or unset one
/// restarts from `now`.
#[must_use]
pub fn next_expiry(
    current: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    duration: Duration,
) -> Option<DateTime<Utc>> {
    let base = match current {
        Some(expires_at) if expires_at > now => expires_at,
        _ => now,
    };
    base.checked_add_signed(duration)
}

/// Ordering used by [`EntitlementLedger::list_all`]: expiry ascending, no
/// expiry last, then email.
pub fn by_expiry(a: &SubscriberRecord, b: &SubscriberRecord) -> Ordering {
    let expiry = match (a.expires_at, b.expires_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    expiry.then_with(|| a.email.to_lowercase().cmp(&b.email.to_lowercase()))
}

/// Reads and updates per-account entitlements.
#[derive(Clone)]
pub struct EntitlementLedger {
    store: Arc<dyn AccessStore>,
}

impl EntitlementLedger {
    pub fn new(store: Arc<dyn AccessStore>) -> Self {
        Self { store }
    }

    /// Adds `duration_days` of access in one atomic update.
    ///
    /// Also clears the reminder flag, stamps the renewal time and bumps the
    /// renewal count. Nothing changes if the new expiry would be out of
    /// range.
    pub fn extend(
        &self,
        account: AccountId,
        now: DateTime<Utc>,
        duration_days: u32,
    ) -> AccessResult<Entitlement> {
        let duration = Duration::days(i64::from(duration_days));
        let mut out_of_range = false;
        let updated = self.store.update_entitlement(account, &mut |entitlement: &mut Entitlement| {
            let Some(expires_at) = next_expiry(entitlement.expires_at, now, duration) else {
                out_of_range = true;
                return;
            };
            entitlement.expires_at = Some(expires_at);
            entitlement.reminder_sent = false;
            entitlement.last_renewal_at = Some(now);
            entitlement.renewal_count = entitlement.renewal_count.saturating_add(1);
        })?;
        if out_of_range {
            warn!(account = %account, duration_days, "extension would overflow the expiry, refused");
            return Err(AccessError::ExpiryOutOfRange(account));
        }
        info!(
            account = %account,
            renewals = updated.renewal_count,
            "extended access until {}",
            updated.expires_at.map(|e| e.to_rfc3339()).unwrap_or_default()
        );
        Ok(updated)
    }

    /// Returns true if the account has unexpired access at `now`.
    pub fn is_active(&self, account: AccountId, now: DateTime<Utc>) -> AccessResult<bool> {
        Ok(self
            .store
            .entitlement(account)?
            .is_some_and(|e| e.is_active(now)))
    }

    /// Current entitlement for the account.
    pub fn entitlement(&self, account: AccountId) -> AccessResult<Entitlement> {
        self.store
            .entitlement(account)?
            .ok_or(AccessError::AccountNotFound(account))
    }

    /// All subscribers, optionally filtered by email substring, sorted by
    /// [`by_expiry`].
    pub fn list_all(&self, email_filter: Option<&str>) -> AccessResult<Vec<SubscriberRecord>> {
        let filter = email_filter.map(str::trim).filter(|f| !f.is_empty());
        let mut records = self.store.list_subscribers(filter)?;
        records.sort_by(by_expiry);
        Ok(records)
    }

    /// Sets the reminder flag unless the account was extended after the
    /// caller's snapshot.
    ///
    /// Returns whether the flag was set.
    pub fn mark_reminder_sent(
        &self,
        account: AccountId,
        expected_renewal_count: u32,
    ) -> AccessResult<bool> {
        let mut marked = false;
        self.store.update_entitlement(account, &mut |entitlement: &mut Entitlement| {
            if entitlement.renewal_count == expected_renewal_count {
                entitlement.reminder_sent = true;
                marked = true;
            }
        })?;
        if !marked {
            debug!(account = %account, "renewed since snapshot, reminder flag left clear");
        }
        Ok(marked)
    }
}
