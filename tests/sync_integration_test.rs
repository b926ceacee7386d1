use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use pawsync::{
    ClientStore, Config, MemoryStore, MockBillingProvider, ProviderSubscription,
    SubscriptionStatus, SyncEngine,
};

fn metadata(days: &str, start: &str, end: &str) -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("days".to_string(), days.to_string());
    m.insert("start_time".to_string(), start.to_string());
    m.insert("end_time".to_string(), end.to_string());
    m.insert("location".to_string(), "Edinburgh Gardens".to_string());
    m.insert("dogs".to_string(), "2".to_string());
    m.insert("price_cents".to_string(), "2500".to_string());
    m
}

fn subscription(
    id: &str,
    customer: &str,
    service: &str,
    metadata: HashMap<String, String>,
) -> ProviderSubscription {
    ProviderSubscription {
        id: id.to_string(),
        customer_ref: customer.to_string(),
        customer_email: Some(format!("{}@example.com", customer)),
        customer_name: Some("Alex Walker".to_string()),
        status: SubscriptionStatus::Active,
        service_code: Some(service.to_string()),
        metadata,
    }
}

// 2026-08-31 is a Monday.
fn monday() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 8, 31)
        .unwrap()
        .and_hms_opt(6, 0, 0)
        .unwrap()
}

fn engine(
    store: &Arc<MemoryStore>,
    provider: &Arc<MockBillingProvider>,
) -> SyncEngine<MemoryStore, MockBillingProvider> {
    SyncEngine::new(Arc::clone(store), Arc::clone(provider), Config::default())
}

#[tokio::test]
async fn full_lifecycle_materialize_bill_and_clean_up() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockBillingProvider::new());
    provider.push_subscription(subscription(
        "sub_1",
        "cus_1",
        "WALK_SHORT_SINGLE",
        metadata("MON,WED", "09:00", "10:00"),
    ));
    let engine = engine(&store, &provider);

    // two weekdays over two weeks, exclusive horizon end
    let summary = engine.sync_all_from(monday(), 14).await.unwrap();
    assert_eq!(summary.subscriptions_processed, 1);
    assert_eq!(summary.bookings_created, 4);
    assert_eq!(summary.errors_count, 0);

    let bookings = store.all_bookings().await;
    assert_eq!(bookings.len(), 4);
    for booking in &bookings {
        assert_eq!(booking.service_label, "Short Walk (Single)");
        assert_eq!(booking.dogs, 2);
        assert!(booking.invoice_id.is_some());
        assert_eq!(booking.price_cents, 2500);
    }
    // whole batch went on one draft invoice
    assert_eq!(provider.invoice_create_count(), 1);

    // a second run over the same window changes nothing
    let again = engine.sync_all_from(monday(), 14).await.unwrap();
    assert_eq!(again.bookings_created, 0);
    assert_eq!(again.bookings_updated, 0);
    assert_eq!(store.all_bookings().await.len(), 4);

    // subscription disappears: future bookings are soft-deleted
    provider.clear_subscriptions();
    let cleaned = engine.sync_all_from(monday(), 14).await.unwrap();
    assert_eq!(cleaned.bookings_cleaned, 4);
    assert!(store.all_bookings().await.iter().all(|b| b.deleted));
}

#[tokio::test]
async fn schedule_edits_flow_into_unbilled_bookings() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockBillingProvider::new());
    provider.push_subscription(subscription(
        "sub_1",
        "cus_1",
        "WALK_SHORT_SINGLE",
        metadata("MON,WED", "09:00", "10:00"),
    ));
    let engine = engine(&store, &provider);

    engine.sync_all_from(monday(), 14).await.unwrap();
    // the first run invoiced everything, and an invoiced row is frozen
    provider.clear_subscriptions();
    let mut changed = metadata("MON,WED", "09:00", "11:00");
    changed.insert("location".to_string(), "Princes Park".to_string());
    provider.push_subscription(subscription("sub_1", "cus_1", "WALK_SHORT_SINGLE", changed));

    let summary = engine.sync_all_from(monday(), 14).await.unwrap();
    assert_eq!(summary.bookings_updated, 0);
    let bookings = store.all_bookings().await;
    assert!(bookings.iter().all(|b| b.location == "Edinburgh Gardens"));
}

#[tokio::test]
async fn schedule_edits_update_credit_covered_bookings() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockBillingProvider::new());
    provider.push_subscription(subscription(
        "sub_1",
        "cus_1",
        "WALK_SHORT_SINGLE",
        metadata("MON,WED", "09:00", "10:00"),
    ));
    let engine = engine(&store, &provider);

    // seed the client with enough credit to cover all four bookings
    store
        .seed_client(pawsync::Client {
            id: "client_1".to_string(),
            name: "Alex Walker".to_string(),
            email: Some("cus_1@example.com".to_string()),
            phone: None,
            billing_customer_id: Some("cus_1".to_string()),
            credit_cents: 10_000,
            notes: String::new(),
        })
        .await;

    engine.sync_all_from(monday(), 14).await.unwrap();
    let bookings = store.all_bookings().await;
    assert!(bookings
        .iter()
        .all(|b| b.status == pawsync::BookingStatus::PaidByCredit));
    assert_eq!(provider.invoice_create_count(), 0);

    // credit-covered rows are not frozen; edits still land
    provider.clear_subscriptions();
    let mut changed = metadata("MON,WED", "09:00", "10:00");
    changed.insert("location".to_string(), "Princes Park".to_string());
    provider.push_subscription(subscription("sub_1", "cus_1", "WALK_SHORT_SINGLE", changed));

    let summary = engine.sync_all_from(monday(), 14).await.unwrap();
    assert_eq!(summary.bookings_updated, 4);
    assert!(store
        .all_bookings()
        .await
        .iter()
        .all(|b| b.location == "Princes Park"));
}

#[tokio::test]
async fn prefixed_metadata_keys_win_over_bare_ones() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockBillingProvider::new());
    let mut md = metadata("MON", "09:00", "10:00");
    md.insert("schedule_days".to_string(), "FRI".to_string());
    provider.push_subscription(subscription("sub_1", "cus_1", "WALK_SHORT_SINGLE", md));
    let engine = engine(&store, &provider);

    engine.sync_all_from(monday(), 7).await.unwrap();
    let bookings = store.all_bookings().await;
    assert_eq!(bookings.len(), 1);
    // Friday of the reference week, not Monday
    assert_eq!(
        bookings[0].start.date(),
        NaiveDate::from_ymd_opt(2026, 9, 4).unwrap()
    );
}

#[tokio::test]
async fn overnight_service_ends_next_day() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockBillingProvider::new());
    provider.push_subscription(subscription(
        "sub_1",
        "cus_1",
        "BOARD_OVERNIGHT_SINGLE",
        metadata("MON", "18:00", "08:00"),
    ));
    let engine = engine(&store, &provider);

    engine.sync_all_from(monday(), 7).await.unwrap();
    let bookings = store.all_bookings().await;
    assert_eq!(bookings.len(), 1);
    let booking = &bookings[0];
    assert_eq!(booking.start.date(), NaiveDate::from_ymd_opt(2026, 8, 31).unwrap());
    assert_eq!(booking.end.date(), NaiveDate::from_ymd_opt(2026, 9, 1).unwrap());
}

#[tokio::test]
async fn one_bad_subscription_does_not_break_the_rest() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockBillingProvider::new());
    let mut broken = metadata("MON", "09:00", "10:00");
    broken.insert("days".to_string(), "SOMEDAY".to_string());
    provider.push_subscription(subscription("sub_bad", "cus_1", "WALK_SHORT_SINGLE", broken));
    provider.push_subscription(subscription(
        "sub_good",
        "cus_2",
        "WALK_SHORT_SINGLE",
        metadata("TUE", "09:00", "10:00"),
    ));
    let engine = engine(&store, &provider);

    let summary = engine.sync_all_from(monday(), 7).await.unwrap();
    assert_eq!(summary.errors_count, 1);
    assert_eq!(summary.subscriptions_processed, 1);
    assert_eq!(summary.bookings_created, 1);
}

#[tokio::test]
async fn provider_outage_fails_the_run_without_side_effects() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockBillingProvider::new());
    provider.push_subscription(subscription(
        "sub_1",
        "cus_1",
        "WALK_SHORT_SINGLE",
        metadata("MON", "09:00", "10:00"),
    ));
    provider.fail_on("list_subscriptions");
    let engine = engine(&store, &provider);

    assert!(engine.sync_all_from(monday(), 7).await.is_err());
    assert!(store.all_bookings().await.is_empty());

    // once the provider recovers, the run proceeds normally
    provider.clear_failures();
    let summary = engine.sync_all_from(monday(), 7).await.unwrap();
    assert_eq!(summary.bookings_created, 1);
}

#[tokio::test]
async fn stored_schedule_keeps_materializing_through_bad_metadata() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockBillingProvider::new());
    provider.push_subscription(subscription(
        "sub_1",
        "cus_1",
        "WALK_SHORT_SINGLE",
        metadata("MON", "09:00", "10:00"),
    ));
    let engine = engine(&store, &provider);
    engine.sync_all_from(monday(), 7).await.unwrap();

    // metadata loses its times; the saved schedule covers the gap
    provider.clear_subscriptions();
    let mut bad = metadata("MON", "09:00", "10:00");
    bad.remove("start_time");
    bad.remove("end_time");
    provider.push_subscription(subscription("sub_1", "cus_1", "WALK_SHORT_SINGLE", bad));

    let next_week = monday() + chrono::Duration::days(7);
    let summary = engine.sync_all_from(next_week, 7).await.unwrap();
    assert_eq!(summary.errors_count, 0);
    assert_eq!(summary.bookings_created, 1);
}

#[tokio::test]
async fn unmatched_subscription_creates_a_placeholder_client() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockBillingProvider::new());
    provider.push_subscription(subscription(
        "sub_1",
        "cus_new",
        "WALK_SHORT_SINGLE",
        metadata("MON", "09:00", "10:00"),
    ));
    let engine = engine(&store, &provider);

    engine.sync_all_from(monday(), 7).await.unwrap();
    engine.sync_all_from(monday(), 7).await.unwrap();

    let client = store
        .find_by_customer_ref("cus_new")
        .await
        .unwrap()
        .expect("placeholder client should exist");
    assert_eq!(client.name, "Alex Walker");
    assert_eq!(client.billing_customer_id.as_deref(), Some("cus_new"));

    // both runs resolved to the same client
    let bookings = store.all_bookings().await;
    assert!(bookings.iter().all(|b| b.client_id == client.id));
}

#[tokio::test]
async fn email_match_links_the_billing_customer() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockBillingProvider::new());
    store
        .seed_client(pawsync::Client {
            id: "client_7".to_string(),
            name: "Morgan".to_string(),
            email: Some("CUS_1@Example.com".to_string()),
            phone: None,
            billing_customer_id: None,
            credit_cents: 0,
            notes: String::new(),
        })
        .await;
    provider.push_subscription(subscription(
        "sub_1",
        "cus_1",
        "WALK_SHORT_SINGLE",
        metadata("MON", "09:00", "10:00"),
    ));
    let engine = engine(&store, &provider);

    engine.sync_all_from(monday(), 7).await.unwrap();

    let client = store.get_client("client_7").await.unwrap().unwrap();
    assert_eq!(client.billing_customer_id.as_deref(), Some("cus_1"));
    let bookings = store.all_bookings().await;
    assert!(bookings.iter().all(|b| b.client_id == "client_7"));
}
