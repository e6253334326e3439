//! Access decisions for token-bearing requests.

use crate::error::AccessResult;
use crate::ledger::EntitlementLedger;
use crate::tokens::TokenStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Why access was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The token is known but its entitlement has lapsed.
    Expired,
    /// Reserved for device limits. Never produced.
    TooManyDevices,
}

/// Outcome of [`AccessEvaluator::check_access`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub granted: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: Option<DenyReason>,
}

impl AccessDecision {
    #[must_use]
    pub fn granted(expires_at: DateTime<Utc>) -> Self {
        Self {
            granted: true,
            expires_at: Some(expires_at),
            reason: None,
        }
    }

    #[must_use]
    pub fn denied(reason: Option<DenyReason>) -> Self {
        Self {
            granted: false,
            expires_at: None,
            reason,
        }
    }
}

/// Wire form of an access decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub access: bool,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
}

impl CheckResponse {
    /// Plain refusal, used when the request cannot be evaluated.
    #[must_use]
    pub fn denied() -> Self {
        Self {
            access: false,
            expires: None,
            reason: None,
        }
    }
}

impl From<AccessDecision> for CheckResponse {
    fn from(decision: AccessDecision) -> Self {
        Self {
            access: decision.granted,
            expires: decision.expires_at.map(|e| e.timestamp()),
            reason: decision.reason,
        }
    }
}

/// Read-only access checks.
pub struct AccessEvaluator<'a> {
    tokens: &'a TokenStore,
    ledger: &'a EntitlementLedger,
}

impl<'a> AccessEvaluator<'a> {
    pub fn new(tokens: &'a TokenStore, ledger: &'a EntitlementLedger) -> Self {
        Self { tokens, ledger }
    }

    /// Decides whether `token` grants access at `now`.
    ///
    /// `device` is accepted for the wire contract and only logged.
    pub fn check_access(
        &self,
        token: Option<&str>,
        device: Option<&str>,
        now: DateTime<Utc>,
    ) -> AccessResult<AccessDecision> {
        trace!(device = device.unwrap_or("-"), "access check");

        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(AccessDecision::denied(None));
        };
        let Some(account) = self.tokens.find_by_token(token)? else {
            return Ok(AccessDecision::denied(None));
        };

        let entitlement = self.ledger.entitlement(account)?;
        match entitlement.expires_at {
            Some(expires_at) if expires_at > now => Ok(AccessDecision::granted(expires_at)),
            _ => Ok(AccessDecision::denied(Some(DenyReason::Expired))),
        }
    }
}
