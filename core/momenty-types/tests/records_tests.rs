use chrono::{Duration, TimeZone, Utc};
use momenty_types::{
    AccountId, Entitlement, LineItem, PendingToken, PurchaseCompleted, Token,
};

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

// ── Entitlement ──────────────────────────────────────────────────

#[test]
fn new_entitlement_is_inactive() {
    let ent = Entitlement::new(AccountId::new());
    assert!(!ent.is_active(t0()));
    assert_eq!(ent.days_left(t0()), None);
    assert_eq!(ent.renewal_count, 0);
    assert!(!ent.reminder_sent);
}

#[test]
fn active_is_strictly_after_now() {
    let mut ent = Entitlement::new(AccountId::new());
    ent.expires_at = Some(t0());
    assert!(!ent.is_active(t0()));
    ent.expires_at = Some(t0() + Duration::seconds(1));
    assert!(ent.is_active(t0()));
}

#[test]
fn days_left_rounds_down() {
    let mut ent = Entitlement::new(AccountId::new());
    ent.expires_at = Some(t0() + Duration::days(5) + Duration::hours(23));
    assert_eq!(ent.days_left(t0()), Some(5));
    ent.expires_at = Some(t0() - Duration::hours(1));
    assert_eq!(ent.days_left(t0()), Some(-1));
}

#[test]
fn entitlement_serde_uses_camel_case() {
    let ent = Entitlement::new(AccountId::new());
    let json = serde_json::to_string(&ent).unwrap();
    assert!(json.contains("\"renewalCount\":0"));
    assert!(json.contains("\"reminderSent\":false"));
}

// ── PendingToken ─────────────────────────────────────────────────

#[test]
fn pending_token_expires_after_ttl() {
    let pending = PendingToken {
        fingerprint: "fp".into(),
        token: Token::new("ABCDEF"),
        created_at: t0(),
    };
    let ttl = Duration::hours(72);
    assert!(pending.is_live(t0() + Duration::hours(71), ttl));
    assert!(!pending.is_live(t0() + Duration::hours(72), ttl));
}

#[test]
fn pending_token_with_unbounded_ttl_stays_live() {
    let pending = PendingToken {
        fingerprint: "fp".to_string(),
        token: Token::new("ABC234"),
        created_at: t0(),
    };
    let ttl = Duration::days(1_000_000_000);
    assert!(pending.is_live(t0() + Duration::days(365), ttl));
}

// ── PurchaseCompleted ────────────────────────────────────────────

#[test]
fn purchase_parses_wire_json() {
    let json = r#"{
        "orderId": "1042",
        "buyerEmail": "a@example.com",
        "buyerFirstName": "Anna",
        "buyerLastName": "Nowak",
        "lineItems": [{"productId": 7}, {"productId": 9}]
    }"#;
    let event: PurchaseCompleted = serde_json::from_str(json).unwrap();
    assert_eq!(event.order_id, "1042");
    assert_eq!(event.line_items, vec![LineItem { product_id: 7 }, LineItem { product_id: 9 }]);
    assert!(event.contains_any(&[9]));
    assert!(!event.contains_any(&[1, 2]));
}

#[test]
fn empty_allow_list_qualifies_nothing() {
    let event = PurchaseCompleted {
        order_id: "1".into(),
        buyer_email: "a@example.com".into(),
        buyer_first_name: String::new(),
        buyer_last_name: String::new(),
        line_items: vec![LineItem { product_id: 7 }],
    };
    assert!(!event.contains_any(&[]));
}
