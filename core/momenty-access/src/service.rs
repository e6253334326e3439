//! The lifecycle facade wired into the HTTP surface.

use crate::access::{AccessDecision, AccessEvaluator};
use crate::blocking::run_blocking;
use crate::config::{AccessConfig, ConfigHandle};
use crate::error::{AccessError, AccessResult};
use crate::identity::IdentityResolver;
use crate::ledger::EntitlementLedger;
use crate::notify::{Mailer, NotificationRenderer, Recipient};
use crate::sweeper::{ReminderSweeper, SweepReport};
use crate::tokens::TokenStore;
use chrono::{DateTime, Utc};
use momenty_storage::AccessStore;
use momenty_types::{Account, AccountId, Entitlement, PurchaseCompleted, SubscriberRecord, Token};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a purchase event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// No allow-listed product in the order.
    Ignored,
    /// The buyer's account could not be created.
    Dropped { reason: String },
    /// Access was granted or extended.
    Granted {
        account: AccountId,
        token: Token,
        expires_at: DateTime<Utc>,
        renewal_count: u32,
    },
}

/// Store-facing components, cloned into blocking tasks.
#[derive(Clone)]
struct Lifecycle {
    store: Arc<dyn AccessStore>,
    identity: IdentityResolver,
    tokens: TokenStore,
    ledger: EntitlementLedger,
}

enum Grant {
    Dropped(String),
    Granted {
        profile: Account,
        token: Token,
        entitlement: Entitlement,
    },
}

impl Lifecycle {
    fn grant(
        &self,
        event: &PurchaseCompleted,
        config: &AccessConfig,
        now: DateTime<Utc>,
    ) -> AccessResult<Grant> {
        let order = Some(event.order_id.as_str()).filter(|o| !o.is_empty());
        let account = match self.identity.resolve(
            &event.buyer_email,
            &event.buyer_first_name,
            &event.buyer_last_name,
            order,
            now,
        ) {
            Ok(account) => account,
            Err(AccessError::IdentityCreation(reason)) => return Ok(Grant::Dropped(reason)),
            Err(e) => return Err(e),
        };

        let token = self
            .tokens
            .get_or_issue_token(account, &event.buyer_email, config, now)?;
        let entitlement = self
            .ledger
            .extend(account, now, config.access_duration_days)?;
        let profile = self
            .store
            .account(account)?
            .ok_or(AccessError::AccountNotFound(account))?;
        Ok(Grant::Granted {
            profile,
            token,
            entitlement,
        })
    }
}

/// Owns the lifecycle components over one store and one mailer.
///
/// Every store call runs on the blocking pool; only mail delivery is awaited
/// on the caller's task.
pub struct AccessService {
    lifecycle: Lifecycle,
    config: ConfigHandle,
    mailer: Arc<dyn Mailer>,
}

impl AccessService {
    pub fn new(store: Arc<dyn AccessStore>, config: ConfigHandle, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            lifecycle: Lifecycle {
                identity: IdentityResolver::new(Arc::clone(&store)),
                tokens: TokenStore::new(Arc::clone(&store)),
                ledger: EntitlementLedger::new(Arc::clone(&store)),
                store,
            },
            config,
            mailer,
        }
    }

    /// The live configuration handle.
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn ledger(&self) -> &EntitlementLedger {
        &self.lifecycle.ledger
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.lifecycle.tokens
    }

    /// Grants or extends access for a completed purchase.
    ///
    /// Non-qualifying orders touch nothing. A buyer whose account cannot be
    /// created is dropped without retry. A welcome email goes out on every
    /// grant unless its template is empty; delivery failure is only logged.
    ///
    /// # Errors
    ///
    /// Store failures, so the event source can redeliver.
    pub async fn handle_purchase(
        &self,
        event: &PurchaseCompleted,
        now: DateTime<Utc>,
    ) -> AccessResult<PurchaseOutcome> {
        let config = self.config.snapshot();
        if !config.qualifies(event) {
            debug!(order = %event.order_id, "no qualifying product, ignoring");
            return Ok(PurchaseOutcome::Ignored);
        }

        let grant = {
            let lifecycle = self.lifecycle.clone();
            let config = Arc::clone(&config);
            let event = event.clone();
            run_blocking(move || lifecycle.grant(&event, &config, now)).await?
        };
        let (profile, token, entitlement) = match grant {
            Grant::Dropped(reason) => {
                warn!(order = %event.order_id, "dropping purchase: {reason}");
                return Ok(PurchaseOutcome::Dropped { reason });
            }
            Grant::Granted {
                profile,
                token,
                entitlement,
            } => (profile, token, entitlement),
        };
        let account = profile.id;
        let expires_at = entitlement
            .expires_at
            .ok_or(AccessError::AccountNotFound(account))?;

        let recipient = Recipient {
            email: profile.email.as_str(),
            first_name: &profile.given_name,
            last_name: &profile.family_name,
        };
        if let Some(message) = NotificationRenderer::new(&config).welcome(recipient, &token, expires_at)
        {
            if let Err(e) = self
                .mailer
                .send(&message.to, &message.subject, &message.body)
                .await
            {
                warn!(account = %account, "welcome delivery failed: {e}");
            }
        }

        info!(
            order = %event.order_id,
            account = %account,
            renewals = entitlement.renewal_count,
            "purchase granted access"
        );
        Ok(PurchaseOutcome::Granted {
            account,
            token,
            expires_at,
            renewal_count: entitlement.renewal_count,
        })
    }

    /// See [`AccessEvaluator::check_access`].
    pub async fn check_access(
        &self,
        token: Option<&str>,
        device: Option<&str>,
        now: DateTime<Utc>,
    ) -> AccessResult<AccessDecision> {
        let lifecycle = self.lifecycle.clone();
        let token = token.map(str::to_owned);
        let device = device.map(str::to_owned);
        run_blocking(move || {
            AccessEvaluator::new(&lifecycle.tokens, &lifecycle.ledger).check_access(
                token.as_deref(),
                device.as_deref(),
                now,
            )
        })
        .await
    }

    /// Runs one reminder sweep with the current configuration.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> AccessResult<SweepReport> {
        let config = self.config.snapshot();
        ReminderSweeper::new(&self.lifecycle.ledger, &self.lifecycle.tokens, self.mailer.as_ref())
            .run_sweep(&config, now)
            .await
    }

    /// Reserves a token for a buyer ahead of their purchase.
    pub async fn reserve_token(&self, email: &str, now: DateTime<Utc>) -> AccessResult<Token> {
        let config = self.config.snapshot();
        let tokens = self.lifecycle.tokens.clone();
        let email = email.to_owned();
        run_blocking(move || tokens.reserve_token(&email, &config, now)).await
    }

    /// Subscriber listing, soonest expiry first.
    pub async fn subscribers(
        &self,
        email_filter: Option<&str>,
    ) -> AccessResult<Vec<SubscriberRecord>> {
        let ledger = self.lifecycle.ledger.clone();
        let filter = email_filter.map(str::to_owned);
        run_blocking(move || ledger.list_all(filter.as_deref())).await
    }
}
