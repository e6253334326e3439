//! Shared fixtures for lifecycle tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use momenty_access::{
    AccessConfig, AccessError, AccessResult, AccessService, ConfigHandle, Mailer, Message,
};
use momenty_storage::{AccessStore, MemoryStore, StorageError, StorageResult};
use momenty_types::{
    Account, AccountId, Entitlement, LineItem, NormalizedEmail, PendingToken, PurchaseCompleted,
    SubscriberRecord, Token,
};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc as async_mpsc;

/// Product id on the allow-list of [`test_config`].
pub const COURSE: u64 = 4242;

/// A product that grants nothing.
pub const MERCH: u64 = 7;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// 30-day access, reminder at 5 days, both templates set.
pub fn test_config() -> AccessConfig {
    AccessConfig {
        allowed_products: vec![COURSE],
        access_url: "https://momenty.pl/watch".to_string(),
        renewal_url: "https://momenty.pl/renew".to_string(),
        welcome_template: "Hi {NAME}, your code is {TOKEN}. Watch: {ACCESS_LINK} until {EXPIRES}"
            .to_string(),
        reminder_template: "Hi {NAME}, access ends {EXPIRES}. Renew: {RENEWAL_LINK}".to_string(),
        ..AccessConfig::default()
    }
}

pub fn purchase(email: &str, products: &[u64]) -> PurchaseCompleted {
    PurchaseCompleted {
        order_id: format!("order-{email}"),
        buyer_email: email.to_string(),
        buyer_first_name: "Anna".to_string(),
        buyer_last_name: "Nowak".to_string(),
        line_items: products
            .iter()
            .map(|&product_id| LineItem { product_id })
            .collect(),
    }
}

/// Captures every message instead of delivering it.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Message>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> AccessResult<()> {
        self.sent.lock().unwrap().push(Message {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Rejects every message.
#[derive(Default)]
pub struct FailingMailer {
    attempts: Mutex<usize>,
}

impl FailingMailer {
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> AccessResult<()> {
        *self.attempts.lock().unwrap() += 1;
        Err(AccessError::Mail("smtp unavailable".to_string()))
    }
}

pub struct Harness {
    pub store: Arc<dyn AccessStore>,
    pub mailer: Arc<RecordingMailer>,
    pub service: Arc<AccessService>,
}

/// In-memory service with a recording mailer.
pub fn harness(config: AccessConfig) -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()), config)
}

pub fn harness_with_store(store: Arc<dyn AccessStore>, config: AccessConfig) -> Harness {
    let mailer = Arc::new(RecordingMailer::default());
    let service = Arc::new(AccessService::new(
        Arc::clone(&store),
        ConfigHandle::new(config).unwrap(),
        mailer.clone(),
    ));
    Harness {
        store,
        mailer,
        service,
    }
}

type TokenGate = (async_mpsc::UnboundedSender<()>, mpsc::Receiver<()>);

/// Memory store with switches for failure and interleaving scenarios.
#[derive(Default)]
pub struct ScriptedStore {
    inner: MemoryStore,
    failing_account: Mutex<Option<AccountId>>,
    renew_after_listing: Mutex<Option<AccountId>>,
    token_gate: Mutex<Option<TokenGate>>,
}

impl ScriptedStore {
    /// Every entitlement update for `account` fails from now on.
    pub fn fail_updates_for(&self, account: AccountId) {
        *self.failing_account.lock().unwrap() = Some(account);
    }

    /// The next listing is followed by a renewal of `account`, as if a
    /// purchase landed right after the caller's snapshot.
    pub fn renew_after_listing(&self, account: AccountId) {
        *self.renew_after_listing.lock().unwrap() = Some(account);
    }

    /// Parks the next token lookup until the returned sender fires. The
    /// receiver yields once the lookup has started.
    pub fn hold_next_token_lookup(&self) -> (async_mpsc::UnboundedReceiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = async_mpsc::unbounded_channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.token_gate.lock().unwrap() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }
}

impl AccessStore for ScriptedStore {
    fn find_account_by_email(&self, email: &NormalizedEmail) -> StorageResult<Option<Account>> {
        self.inner.find_account_by_email(email)
    }

    fn account(&self, id: AccountId) -> StorageResult<Option<Account>> {
        self.inner.account(id)
    }

    fn username_exists(&self, username: &str) -> StorageResult<bool> {
        self.inner.username_exists(username)
    }

    fn create_account(&self, account: &Account, credential_digest: &str) -> StorageResult<()> {
        self.inner.create_account(account, credential_digest)
    }

    fn link_order(&self, order_id: &str, account: AccountId) -> StorageResult<()> {
        self.inner.link_order(order_id, account)
    }

    fn order_account(&self, order_id: &str) -> StorageResult<Option<AccountId>> {
        self.inner.order_account(order_id)
    }

    fn find_by_token(&self, token: &Token) -> StorageResult<Option<AccountId>> {
        let gate = self.token_gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.send(()).unwrap();
            release
                .recv_timeout(Duration::from_secs(5))
                .map_err(|_| StorageError::InvalidData("token lookup never released".to_string()))?;
        }
        self.inner.find_by_token(token)
    }

    fn token_in_use(&self, token: &Token) -> StorageResult<bool> {
        self.inner.token_in_use(token)
    }

    fn assign_token(&self, account: AccountId, token: &Token) -> StorageResult<Token> {
        self.inner.assign_token(account, token)
    }

    fn pending_token(&self, fingerprint: &str) -> StorageResult<Option<PendingToken>> {
        self.inner.pending_token(fingerprint)
    }

    fn put_pending_token(&self, pending: &PendingToken) -> StorageResult<()> {
        self.inner.put_pending_token(pending)
    }

    fn remove_pending_token(&self, fingerprint: &str) -> StorageResult<()> {
        self.inner.remove_pending_token(fingerprint)
    }

    fn purge_pending_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.purge_pending_before(cutoff)
    }

    fn entitlement(&self, account: AccountId) -> StorageResult<Option<Entitlement>> {
        self.inner.entitlement(account)
    }

    fn update_entitlement(
        &self,
        account: AccountId,
        apply: &mut dyn FnMut(&mut Entitlement),
    ) -> StorageResult<Entitlement> {
        if *self.failing_account.lock().unwrap() == Some(account) {
            return Err(StorageError::InvalidData("entitlement row unreadable".to_string()));
        }
        self.inner.update_entitlement(account, apply)
    }

    fn list_subscribers(&self, email_filter: Option<&str>) -> StorageResult<Vec<SubscriberRecord>> {
        let records = self.inner.list_subscribers(email_filter)?;
        let renewed = self.renew_after_listing.lock().unwrap().take();
        if let Some(account) = renewed {
            self.inner
                .update_entitlement(account, &mut |e: &mut Entitlement| e.renewal_count += 1)?;
        }
        Ok(records)
    }
}
