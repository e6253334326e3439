//! Account, entitlement and pending-token records.

use crate::{AccountId, NormalizedEmail, Token};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seconds in one day, the unit of access durations and reminder thresholds.
pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// A resolved buyer identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: NormalizedEmail,
    pub username: String,
    pub given_name: String,
    pub family_name: String,
    pub created_at: DateTime<Utc>,
}

/// Token and expiry bookkeeping for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub account_id: AccountId,
    /// Issued once, never reassigned.
    pub token: Option<Token>,
    pub expires_at: Option<DateTime<Utc>>,
    pub renewal_count: u32,
    pub last_renewal_at: Option<DateTime<Utc>>,
    /// True only if a reminder went out since the last extension.
    pub reminder_sent: bool,
}

impl Entitlement {
    /// Creates an empty entitlement with no token and no expiry.
    #[must_use]
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            token: None,
            expires_at: None,
            renewal_count: 0,
            last_renewal_at: None,
            reminder_sent: false,
        }
    }

    /// Returns true if the expiry is set and strictly after `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp > now)
    }

    /// Whole days until expiry, rounded down. Negative once lapsed.
    #[must_use]
    pub fn days_left(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|exp| days_between(now, exp))
    }
}

/// A token reserved for an email before any account exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingToken {
    /// [`NormalizedEmail::fingerprint`] of the buyer email.
    pub fingerprint: String,
    pub token: Token,
    pub created_at: DateTime<Utc>,
}

impl PendingToken {
    /// Returns true while the reservation is younger than `ttl`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        // A deadline past chrono's range never arrives.
        self.created_at
            .checked_add_signed(ttl)
            .is_none_or(|deadline| now < deadline)
    }
}

/// Flattened per-account view read by reporting and the reminder sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberRecord {
    pub account_id: AccountId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub token: Option<Token>,
    pub expires_at: Option<DateTime<Utc>>,
    pub renewal_count: u32,
    pub last_renewal_at: Option<DateTime<Utc>>,
    pub reminder_sent: bool,
}

impl SubscriberRecord {
    /// Joins an account with its entitlement.
    #[must_use]
    pub fn from_parts(account: &Account, entitlement: &Entitlement) -> Self {
        Self {
            account_id: account.id,
            email: account.email.as_str().to_string(),
            first_name: account.given_name.clone(),
            last_name: account.family_name.clone(),
            token: entitlement.token.clone(),
            expires_at: entitlement.expires_at,
            renewal_count: entitlement.renewal_count,
            last_renewal_at: entitlement.last_renewal_at,
            reminder_sent: entitlement.reminder_sent,
        }
    }

    /// Returns true if the expiry is set and strictly after `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp > now)
    }

    /// Whole days until expiry, rounded down. Negative once lapsed.
    #[must_use]
    pub fn days_left(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|exp| days_between(now, exp))
    }
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().div_euclid(SECONDS_PER_DAY)
}
