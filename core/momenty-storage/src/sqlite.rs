//! SQLite backend.
//!
//! Timestamps are stored as milliseconds since the Unix epoch. File-backed
//! stores run in WAL mode with a second connection for reads, so lookups do
//! not queue behind a write transaction.

use crate::{AccessStore, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use momenty_types::{
    Account, AccountId, Entitlement, NormalizedEmail, PendingToken, SubscriberRecord, Token,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL,
        email_key TEXT NOT NULL UNIQUE,
        username TEXT NOT NULL UNIQUE,
        given_name TEXT NOT NULL,
        family_name TEXT NOT NULL,
        credential_digest TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS entitlements (
        account_id TEXT PRIMARY KEY REFERENCES accounts(id),
        token TEXT UNIQUE,
        expires_at INTEGER,
        renewal_count INTEGER NOT NULL DEFAULT 0,
        last_renewal_at INTEGER,
        reminder_sent INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS pending_tokens (
        fingerprint TEXT PRIMARY KEY,
        token TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS order_links (
        order_id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL REFERENCES accounts(id)
    );
";

const ACCOUNT_COLUMNS: &str =
    "id, email, username, given_name, family_name, created_at";

const ENTITLEMENT_COLUMNS: &str =
    "account_id, token, expires_at, renewal_count, last_renewal_at, reminder_sent";

/// Persistent store backed by SQLite.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    /// Read-only work for file-backed stores. In-memory stores read through
    /// `conn`.
    reader: Option<Arc<Mutex<Connection>>>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        debug!("opening access store at {}", path.display());
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!("journal mode is {mode}, reads will wait for writes");
        }
        let mut store = Self::with_connection(conn)?;

        let reader = Connection::open(path)?;
        reader.busy_timeout(BUSY_TIMEOUT)?;
        store.reader = Some(Arc::new(Mutex::new(reader)));
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            reader: None,
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn reader(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.reader
            .as_ref()
            .unwrap_or(&self.conn)
            .lock()
            .map_err(|_| StorageError::LockPoisoned)
    }
}

impl AccessStore for SqliteStore {
    fn find_account_by_email(&self, email: &NormalizedEmail) -> StorageResult<Option<Account>> {
        let conn = self.reader()?;
        let raw = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email_key = ?1"),
                params![email.key()],
                RawAccount::from_row,
            )
            .optional()?;
        raw.map(RawAccount::decode).transpose()
    }

    fn account(&self, id: AccountId) -> StorageResult<Option<Account>> {
        let conn = self.reader()?;
        let raw = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![id.to_string()],
                RawAccount::from_row,
            )
            .optional()?;
        raw.map(RawAccount::decode).transpose()
    }

    fn username_exists(&self, username: &str) -> StorageResult<bool> {
        let conn = self.reader()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM accounts WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn create_account(&self, account: &Account, credential_digest: &str) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO accounts (id, email, email_key, username, given_name, family_name, credential_digest, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                account.id.to_string(),
                account.email.as_str(),
                account.email.key(),
                account.username,
                account.given_name,
                account.family_name,
                credential_digest,
                account.created_at.timestamp_millis(),
            ],
        )
        .map_err(|e| account_conflict(e, account))?;
        tx.execute(
            "INSERT INTO entitlements (account_id) VALUES (?1)",
            params![account.id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn link_order(&self, order_id: &str, account: AccountId) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO order_links (order_id, account_id) VALUES (?1, ?2)",
            params![order_id, account.to_string()],
        )?;
        Ok(())
    }

    fn order_account(&self, order_id: &str) -> StorageResult<Option<AccountId>> {
        let conn = self.reader()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT account_id FROM order_links WHERE order_id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| parse_account_id(&s)).transpose()
    }

    fn find_by_token(&self, token: &Token) -> StorageResult<Option<AccountId>> {
        let conn = self.reader()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT account_id FROM entitlements WHERE token = ?1",
                params![token.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| parse_account_id(&s)).transpose()
    }

    fn token_in_use(&self, token: &Token) -> StorageResult<bool> {
        let conn = self.reader()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM entitlements WHERE token = ?1
                 UNION ALL
                 SELECT 1 FROM pending_tokens WHERE token = ?1
                 LIMIT 1",
                params![token.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn assign_token(&self, account: AccountId, token: &Token) -> StorageResult<Token> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<Option<String>> = tx
            .query_row(
                "SELECT token FROM entitlements WHERE account_id = ?1",
                params![account.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match current {
            None => return Err(StorageError::AccountNotFound(account)),
            Some(Some(existing)) => return Ok(Token::new(existing)),
            Some(None) => {}
        }
        tx.execute(
            "UPDATE entitlements SET token = ?1 WHERE account_id = ?2 AND token IS NULL",
            params![token.as_str(), account.to_string()],
        )
        .map_err(token_conflict)?;
        tx.commit()?;
        Ok(token.clone())
    }

    fn pending_token(&self, fingerprint: &str) -> StorageResult<Option<PendingToken>> {
        let conn = self.reader()?;
        let raw: Option<(String, i64)> = conn
            .query_row(
                "SELECT token, created_at FROM pending_tokens WHERE fingerprint = ?1",
                params![fingerprint],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        raw.map(|(token, created_at)| {
            Ok(PendingToken {
                fingerprint: fingerprint.to_string(),
                token: Token::new(token),
                created_at: from_millis(created_at)?,
            })
        })
        .transpose()
    }

    fn put_pending_token(&self, pending: &PendingToken) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let issued: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM entitlements WHERE token = ?1",
                params![pending.token.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if issued.is_some() {
            return Err(StorageError::TokenTaken);
        }
        tx.execute(
            "INSERT INTO pending_tokens (fingerprint, token, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(fingerprint) DO UPDATE SET token = excluded.token, created_at = excluded.created_at",
            params![
                pending.fingerprint,
                pending.token.as_str(),
                pending.created_at.timestamp_millis(),
            ],
        )
        .map_err(token_conflict)?;
        tx.commit()?;
        Ok(())
    }

    fn remove_pending_token(&self, fingerprint: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM pending_tokens WHERE fingerprint = ?1",
            params![fingerprint],
        )?;
        Ok(())
    }

    fn purge_pending_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let conn = self.conn()?;
        let purged = conn.execute(
            "DELETE FROM pending_tokens WHERE created_at < ?1",
            params![cutoff.timestamp_millis()],
        )?;
        Ok(purged)
    }

    fn entitlement(&self, account: AccountId) -> StorageResult<Option<Entitlement>> {
        let conn = self.reader()?;
        let raw = conn
            .query_row(
                &format!("SELECT {ENTITLEMENT_COLUMNS} FROM entitlements WHERE account_id = ?1"),
                params![account.to_string()],
                RawEntitlement::from_row,
            )
            .optional()?;
        raw.map(RawEntitlement::decode).transpose()
    }

    fn update_entitlement(
        &self,
        account: AccountId,
        apply: &mut dyn FnMut(&mut Entitlement),
    ) -> StorageResult<Entitlement> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let raw = tx
            .query_row(
                &format!("SELECT {ENTITLEMENT_COLUMNS} FROM entitlements WHERE account_id = ?1"),
                params![account.to_string()],
                RawEntitlement::from_row,
            )
            .optional()?
            .ok_or(StorageError::AccountNotFound(account))?;
        let stored = raw.decode()?;

        let mut draft = stored.clone();
        apply(&mut draft);
        draft.account_id = account;
        draft.token = stored.token;

        tx.execute(
            "UPDATE entitlements
             SET expires_at = ?1, renewal_count = ?2, last_renewal_at = ?3, reminder_sent = ?4
             WHERE account_id = ?5",
            params![
                draft.expires_at.map(|t| t.timestamp_millis()),
                draft.renewal_count,
                draft.last_renewal_at.map(|t| t.timestamp_millis()),
                draft.reminder_sent,
                account.to_string(),
            ],
        )?;
        tx.commit()?;
        Ok(draft)
    }

    fn list_subscribers(&self, email_filter: Option<&str>) -> StorageResult<Vec<SubscriberRecord>> {
        let conn = self.reader()?;
        let needle = email_filter.map(str::to_lowercase);
        let mut stmt = conn.prepare(
            "SELECT a.id, a.email, a.username, a.given_name, a.family_name, a.created_at,
                    e.account_id, e.token, e.expires_at, e.renewal_count, e.last_renewal_at, e.reminder_sent
             FROM accounts a
             JOIN entitlements e ON e.account_id = a.id
             WHERE e.token IS NOT NULL AND (?1 IS NULL OR instr(a.email_key, ?1) > 0)",
        )?;
        let rows = stmt.query_map(params![needle], |row| {
            Ok((RawAccount::from_row(row)?, RawEntitlement::from_row_at(row, 6)?))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let decoded = row.map_err(StorageError::from).and_then(|(account, entitlement)| {
                Ok((account.decode()?, entitlement.decode()?))
            });
            match decoded {
                Ok((account, entitlement)) => {
                    result.push(SubscriberRecord::from_parts(&account, &entitlement));
                }
                Err(e) => warn!("skipping unreadable subscriber row: {e}"),
            }
        }
        Ok(result)
    }
}

// ── Row decoding ─────────────────────────────────────────────────

struct RawAccount {
    id: String,
    email: String,
    username: String,
    given_name: String,
    family_name: String,
    created_at: i64,
}

impl RawAccount {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            username: row.get(2)?,
            given_name: row.get(3)?,
            family_name: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn decode(self) -> StorageResult<Account> {
        let email = NormalizedEmail::parse(&self.email)
            .map_err(|e| StorageError::InvalidData(format!("stored email: {e}")))?;
        Ok(Account {
            id: parse_account_id(&self.id)?,
            email,
            username: self.username,
            given_name: self.given_name,
            family_name: self.family_name,
            created_at: from_millis(self.created_at)?,
        })
    }
}

struct RawEntitlement {
    account_id: String,
    token: Option<String>,
    expires_at: Option<i64>,
    renewal_count: u32,
    last_renewal_at: Option<i64>,
    reminder_sent: bool,
}

impl RawEntitlement {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Self::from_row_at(row, 0)
    }

    fn from_row_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            account_id: row.get(offset)?,
            token: row.get(offset + 1)?,
            expires_at: row.get(offset + 2)?,
            renewal_count: row.get(offset + 3)?,
            last_renewal_at: row.get(offset + 4)?,
            reminder_sent: row.get(offset + 5)?,
        })
    }

    fn decode(self) -> StorageResult<Entitlement> {
        Ok(Entitlement {
            account_id: parse_account_id(&self.account_id)?,
            token: self.token.map(Token::new),
            expires_at: self.expires_at.map(from_millis).transpose()?,
            renewal_count: self.renewal_count,
            last_renewal_at: self.last_renewal_at.map(from_millis).transpose()?,
            reminder_sent: self.reminder_sent,
        })
    }
}

fn parse_account_id(s: &str) -> StorageResult<AccountId> {
    s.parse()
        .map_err(|e| StorageError::InvalidData(format!("invalid account id {s:?}: {e}")))
}

fn from_millis(ms: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::InvalidData(format!("timestamp out of range: {ms}")))
}

fn is_unique_violation(err: &rusqlite::Error, column: &str) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg)) => {
            e.code == ErrorCode::ConstraintViolation && msg.contains(column)
        }
        _ => false,
    }
}

fn account_conflict(err: rusqlite::Error, account: &Account) -> StorageError {
    if is_unique_violation(&err, "accounts.email_key") {
        StorageError::DuplicateEmail(account.email.to_string())
    } else if is_unique_violation(&err, "accounts.username") {
        StorageError::DuplicateUsername(account.username.clone())
    } else {
        err.into()
    }
}

fn token_conflict(err: rusqlite::Error) -> StorageError {
    if is_unique_violation(&err, ".token") {
        StorageError::TokenTaken
    } else {
        err.into()
    }
}
