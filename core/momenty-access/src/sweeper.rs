//! Periodic expiry reminders.

use crate::blocking::run_blocking;
use crate::config::AccessConfig;
use crate::error::AccessResult;
use crate::ledger::EntitlementLedger;
use crate::notify::{Mailer, NotificationRenderer};
use crate::tokens::TokenStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Records examined.
    pub scanned: usize,
    /// Reminders handed to the mailer.
    pub reminded: usize,
    /// Due reminders not sent because the template is empty.
    pub suppressed: usize,
    /// Reminders sent to accounts renewed after the sweep's snapshot. Their
    /// flag stays clear for the new cycle.
    pub superseded: usize,
    /// Records whose reminder flag could not be written.
    pub failed: usize,
    /// Expired token reservations dropped.
    pub purged: usize,
}

/// Sends one reminder per cycle to subscribers reaching the threshold.
pub struct ReminderSweeper<'a> {
    ledger: &'a EntitlementLedger,
    tokens: &'a TokenStore,
    mailer: &'a dyn Mailer,
}

impl<'a> ReminderSweeper<'a> {
    pub fn new(ledger: &'a EntitlementLedger, tokens: &'a TokenStore, mailer: &'a dyn Mailer) -> Self {
        Self {
            ledger,
            tokens,
            mailer,
        }
    }

    /// Scans every subscriber once.
    ///
    /// A reminder is due when the whole days left equal
    /// `reminder_threshold_days` exactly and none was sent since the last
    /// extension. The flag is set after sending, even if delivery failed.
    /// Expired token reservations are dropped first.
    pub async fn run_sweep(
        &self,
        config: &AccessConfig,
        now: DateTime<Utc>,
    ) -> AccessResult<SweepReport> {
        let mut report = SweepReport::default();

        let tokens = self.tokens.clone();
        let ttl = config.pending_token_ttl();
        match run_blocking(move || tokens.purge_expired(ttl, now)).await {
            Ok(purged) => report.purged = purged,
            Err(e) => warn!("could not purge expired reservations: {e}"),
        }

        let ledger = self.ledger.clone();
        let records = run_blocking(move || ledger.list_all(None)).await?;
        let renderer = NotificationRenderer::new(config);
        let threshold = i64::from(config.reminder_threshold_days);

        for record in &records {
            report.scanned += 1;
            if record.reminder_sent || !record.is_active(now) {
                continue;
            }
            let (Some(expires_at), Some(days_left)) = (record.expires_at, record.days_left(now))
            else {
                continue;
            };
            if days_left != threshold {
                continue;
            }

            let Some(message) = renderer.reminder(record.into(), expires_at) else {
                debug!(account = %record.account_id, "reminder template empty, not sending");
                report.suppressed += 1;
                continue;
            };

            if let Err(e) = self
                .mailer
                .send(&message.to, &message.subject, &message.body)
                .await
            {
                warn!(account = %record.account_id, "reminder delivery failed: {e}");
            }

            let ledger = self.ledger.clone();
            let (account, renewal_count) = (record.account_id, record.renewal_count);
            match run_blocking(move || ledger.mark_reminder_sent(account, renewal_count)).await {
                Ok(true) => report.reminded += 1,
                Ok(false) => {
                    debug!(account = %account, "renewed during the sweep, flag left clear");
                    report.superseded += 1;
                }
                Err(e) => {
                    error!(account = %record.account_id, "failed to record reminder: {e}");
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            reminded = report.reminded,
            suppressed = report.suppressed,
            superseded = report.superseded,
            failed = report.failed,
            purged = report.purged,
            "reminder sweep finished"
        );
        Ok(report)
    }
}
