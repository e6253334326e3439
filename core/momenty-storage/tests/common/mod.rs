//! Behaviour every `AccessStore` backend must share.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use momenty_storage::{AccessStore, StorageError};
use momenty_types::{Account, AccountId, NormalizedEmail, PendingToken, Token};
use pretty_assertions::assert_eq;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn make_account(email: &str, username: &str) -> Account {
    Account {
        id: AccountId::new(),
        email: NormalizedEmail::parse(email).unwrap(),
        username: username.to_string(),
        given_name: "Anna".to_string(),
        family_name: "Nowak".to_string(),
        created_at: t0(),
    }
}

pub fn create_and_find_by_email(store: &dyn AccessStore) {
    let account = make_account("Anna@Example.com", "anna");
    store.create_account(&account, "digest").unwrap();

    let lookup = NormalizedEmail::parse("anna@example.COM").unwrap();
    let found = store.find_account_by_email(&lookup).unwrap().unwrap();
    assert_eq!(found, account);
    assert_eq!(found.email.as_str(), "Anna@Example.com");
    assert_eq!(store.account(account.id).unwrap(), Some(account.clone()));
    assert!(store.username_exists("anna").unwrap());
    assert!(!store.username_exists("other").unwrap());

    let ent = store.entitlement(account.id).unwrap().unwrap();
    assert_eq!(ent.renewal_count, 0);
    assert_eq!(ent.token, None);
}

pub fn duplicate_email_rejected(store: &dyn AccessStore) {
    store.create_account(&make_account("a@example.com", "a"), "d").unwrap();
    let err = store
        .create_account(&make_account("A@EXAMPLE.COM", "a2"), "d")
        .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateEmail(_)), "{err:?}");
}

pub fn duplicate_username_rejected(store: &dyn AccessStore) {
    store.create_account(&make_account("a@example.com", "same"), "d").unwrap();
    let err = store
        .create_account(&make_account("b@example.com", "same"), "d")
        .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateUsername(_)), "{err:?}");
}

pub fn assign_token_is_first_writer_wins(store: &dyn AccessStore) {
    let account = make_account("a@example.com", "a");
    store.create_account(&account, "d").unwrap();

    let first = store.assign_token(account.id, &Token::new("AAAAAA")).unwrap();
    let second = store.assign_token(account.id, &Token::new("BBBBBB")).unwrap();
    assert_eq!(first, Token::new("AAAAAA"));
    assert_eq!(second, Token::new("AAAAAA"));
    assert_eq!(store.find_by_token(&Token::new("AAAAAA")).unwrap(), Some(account.id));
    assert_eq!(store.find_by_token(&Token::new("BBBBBB")).unwrap(), None);
}

pub fn assign_token_rejects_foreign_token(store: &dyn AccessStore) {
    let a = make_account("a@example.com", "a");
    let b = make_account("b@example.com", "b");
    store.create_account(&a, "d").unwrap();
    store.create_account(&b, "d").unwrap();

    store.assign_token(a.id, &Token::new("SHARED")).unwrap();
    let err = store.assign_token(b.id, &Token::new("SHARED")).unwrap_err();
    assert!(matches!(err, StorageError::TokenTaken), "{err:?}");
    assert_eq!(store.entitlement(b.id).unwrap().unwrap().token, None);
}

pub fn assign_token_unknown_account(store: &dyn AccessStore) {
    let err = store
        .assign_token(AccountId::new(), &Token::new("AAAAAA"))
        .unwrap_err();
    assert!(matches!(err, StorageError::AccountNotFound(_)), "{err:?}");
}

pub fn token_lookup_is_exact(store: &dyn AccessStore) {
    let account = make_account("a@example.com", "a");
    store.create_account(&account, "d").unwrap();
    store.assign_token(account.id, &Token::new("K7XJ9P")).unwrap();

    assert_eq!(store.find_by_token(&Token::new("K7XJ9P")).unwrap(), Some(account.id));
    assert_eq!(store.find_by_token(&Token::new("K7XJ9")).unwrap(), None);
    assert_eq!(store.find_by_token(&Token::new("k7xj9p")).unwrap(), None);
    assert_eq!(store.find_by_token(&Token::new("%")).unwrap(), None);
}

pub fn pending_tokens_round_trip(store: &dyn AccessStore) {
    let pending = PendingToken {
        fingerprint: "fp-a".to_string(),
        token: Token::new("PEND01"),
        created_at: t0(),
    };
    store.put_pending_token(&pending).unwrap();
    assert_eq!(store.pending_token("fp-a").unwrap(), Some(pending.clone()));
    assert!(store.token_in_use(&Token::new("PEND01")).unwrap());

    // Replacing the reservation for the same fingerprint is allowed.
    let replacement = PendingToken {
        token: Token::new("PEND02"),
        created_at: t0() + Duration::hours(1),
        ..pending
    };
    store.put_pending_token(&replacement).unwrap();
    assert_eq!(store.pending_token("fp-a").unwrap(), Some(replacement));
    assert!(!store.token_in_use(&Token::new("PEND01")).unwrap());

    store.remove_pending_token("fp-a").unwrap();
    assert_eq!(store.pending_token("fp-a").unwrap(), None);
    store.remove_pending_token("fp-a").unwrap();
}

pub fn pending_token_cannot_shadow_issued(store: &dyn AccessStore) {
    let account = make_account("a@example.com", "a");
    store.create_account(&account, "d").unwrap();
    store.assign_token(account.id, &Token::new("ISSUED")).unwrap();

    let err = store
        .put_pending_token(&PendingToken {
            fingerprint: "fp-b".to_string(),
            token: Token::new("ISSUED"),
            created_at: t0(),
        })
        .unwrap_err();
    assert!(matches!(err, StorageError::TokenTaken), "{err:?}");

    store
        .put_pending_token(&PendingToken {
            fingerprint: "fp-c".to_string(),
            token: Token::new("OTHER1"),
            created_at: t0(),
        })
        .unwrap();
    let err = store
        .put_pending_token(&PendingToken {
            fingerprint: "fp-d".to_string(),
            token: Token::new("OTHER1"),
            created_at: t0(),
        })
        .unwrap_err();
    assert!(matches!(err, StorageError::TokenTaken), "{err:?}");
}

pub fn update_entitlement_applies_and_keeps_token(store: &dyn AccessStore) {
    let account = make_account("a@example.com", "a");
    store.create_account(&account, "d").unwrap();
    store.assign_token(account.id, &Token::new("KEEPME")).unwrap();

    let updated = store
        .update_entitlement(account.id, &mut |ent| {
            ent.expires_at = Some(t0() + Duration::days(30));
            ent.renewal_count += 1;
            ent.last_renewal_at = Some(t0());
            ent.reminder_sent = true;
            ent.token = Some(Token::new("HIJACK"));
        })
        .unwrap();

    assert_eq!(updated.token, Some(Token::new("KEEPME")));
    assert_eq!(updated.expires_at, Some(t0() + Duration::days(30)));
    assert_eq!(updated.renewal_count, 1);
    assert!(updated.reminder_sent);
    assert_eq!(store.entitlement(account.id).unwrap(), Some(updated));
    assert_eq!(store.find_by_token(&Token::new("HIJACK")).unwrap(), None);
}

pub fn update_entitlement_unknown_account(store: &dyn AccessStore) {
    let err = store
        .update_entitlement(AccountId::new(), &mut |_| {})
        .unwrap_err();
    assert!(matches!(err, StorageError::AccountNotFound(_)), "{err:?}");
}

pub fn list_subscribers_filters_by_email(store: &dyn AccessStore) {
    for (email, user, token) in [
        ("anna@shop.pl", "anna", "ANNA01"),
        ("Bartek@Example.com", "bartek", "BART01"),
        ("celina@example.com", "celina", "CELI01"),
    ] {
        let account = make_account(email, user);
        store.create_account(&account, "d").unwrap();
        store.assign_token(account.id, &Token::new(token)).unwrap();
    }

    assert_eq!(store.list_subscribers(None).unwrap().len(), 3);

    let mut matched: Vec<String> = store
        .list_subscribers(Some("EXAMPLE"))
        .unwrap()
        .into_iter()
        .map(|r| r.email)
        .collect();
    matched.sort();
    assert_eq!(matched, vec!["Bartek@Example.com", "celina@example.com"]);

    assert!(store.list_subscribers(Some("nobody")).unwrap().is_empty());
}

pub fn list_subscribers_skips_accounts_without_token(store: &dyn AccessStore) {
    let holder = make_account("holder@example.com", "holder");
    let pending = make_account("pending@example.com", "pending");
    store.create_account(&holder, "d").unwrap();
    store.create_account(&pending, "d").unwrap();
    store.assign_token(holder.id, &Token::new("HOLD01")).unwrap();

    let listed = store.list_subscribers(None).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].account_id, holder.id);
    assert!(store.list_subscribers(Some("pending")).unwrap().is_empty());
}

pub fn purge_drops_only_old_reservations(store: &dyn AccessStore) {
    for (fingerprint, token, age_hours) in [("fp-old", "OLD001", 100), ("fp-new", "NEW001", 1)] {
        store
            .put_pending_token(&PendingToken {
                fingerprint: fingerprint.to_string(),
                token: Token::new(token),
                created_at: t0() - Duration::hours(age_hours),
            })
            .unwrap();
    }

    let purged = store.purge_pending_before(t0() - Duration::hours(72)).unwrap();
    assert_eq!(purged, 1);
    assert_eq!(store.pending_token("fp-old").unwrap(), None);
    assert!(!store.token_in_use(&Token::new("OLD001")).unwrap());
    assert!(store.pending_token("fp-new").unwrap().is_some());
    assert_eq!(store.purge_pending_before(t0() - Duration::hours(72)).unwrap(), 0);
}

pub fn order_links(store: &dyn AccessStore) {
    let account = make_account("a@example.com", "a");
    store.create_account(&account, "d").unwrap();
    store.link_order("1042", account.id).unwrap();
    assert_eq!(store.order_account("1042").unwrap(), Some(account.id));
    assert_eq!(store.order_account("9999").unwrap(), None);
}
