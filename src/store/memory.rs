//! In-memory store backend.
//!
//! Suitable for small single-process deployments and for tests. Wraps its
//! state in `Arc` so clones are cheap handles onto the same data.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{PawsyncError, Result};
use crate::schedule::{Occurrence, ScheduleSpec};

use super::{
    Booking, BookingOrigin, BookingStatus, BookingStore, Client, ClientStore, CreditOutcome,
    ScheduleStore, UpsertChange, UpsertOutcome,
};

#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    bookings: Mutex<BookingState>,
    clients: RwLock<HashMap<String, Client>>,
    schedules: RwLock<HashMap<String, ScheduleSpec>>,
}

#[derive(Default)]
struct BookingState {
    rows: HashMap<String, Booking>,
    /// Natural key (subscription id, start) -> booking id, live rows only.
    /// This map is the uniqueness constraint; it lives under the same lock
    /// as the rows so concurrent upserts serialize.
    natural_key: HashMap<(String, NaiveDateTime), String>,
    insert_seq: u64,
    /// Booking id -> insertion sequence, for stable list ordering.
    order: HashMap<String, u64>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All non-deleted bookings, in insertion order. Test helper.
    pub async fn all_bookings(&self) -> Vec<Booking> {
        let state = self.inner.bookings.lock().await;
        let mut rows: Vec<&Booking> = state.rows.values().filter(|b| !b.deleted).collect();
        rows.sort_by_key(|b| state.order.get(&b.id).copied().unwrap_or(u64::MAX));
        rows.into_iter().cloned().collect()
    }

    /// Seed a client directly. Test helper.
    pub async fn seed_client(&self, client: Client) {
        self.inner
            .clients
            .write()
            .await
            .insert(client.id.clone(), client);
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn upsert_occurrence(&self, occurrence: &Occurrence) -> Result<UpsertOutcome> {
        let mut state = self.inner.bookings.lock().await;
        let key = (occurrence.subscription_id.clone(), occurrence.start);

        if let Some(existing_id) = state.natural_key.get(&key).cloned() {
            let booking = state
                .rows
                .get_mut(&existing_id)
                .ok_or_else(|| PawsyncError::internal("natural key index points at missing row"))?;

            // Invoiced rows are frozen; the invoice already quotes them.
            if booking.is_invoiced() {
                return Ok(UpsertOutcome {
                    booking_id: existing_id,
                    change: UpsertChange::Unchanged,
                });
            }

            let mut changed = false;
            if booking.end != occurrence.end {
                booking.end = occurrence.end;
                changed = true;
            }
            if booking.location != occurrence.location {
                booking.location = occurrence.location.clone();
                changed = true;
            }
            if booking.dogs != occurrence.dogs {
                booking.dogs = occurrence.dogs;
                changed = true;
            }
            if booking.notes != occurrence.notes {
                booking.notes = occurrence.notes.clone();
                changed = true;
            }
            // Face price is schedule-authoritative only while the row is
            // still waiting to be billed.
            if booking.status == BookingStatus::Scheduled
                && booking.price_cents != occurrence.price_cents
            {
                booking.price_cents = occurrence.price_cents;
                changed = true;
            }

            return Ok(UpsertOutcome {
                booking_id: existing_id,
                change: if changed {
                    UpsertChange::Updated
                } else {
                    UpsertChange::Unchanged
                },
            });
        }

        let id = Uuid::new_v4().to_string();
        let booking = Booking {
            id: id.clone(),
            client_id: occurrence.client_id.clone(),
            service_code: occurrence.service_code,
            service_label: occurrence.service_code.display_name().to_string(),
            start: occurrence.start,
            end: occurrence.end,
            location: occurrence.location.clone(),
            dogs: occurrence.dogs,
            notes: occurrence.notes.clone(),
            price_cents: occurrence.price_cents,
            status: BookingStatus::Scheduled,
            origin: BookingOrigin::Subscription(occurrence.subscription_id.clone()),
            invoice_id: None,
            hosted_invoice_url: None,
            deleted: false,
        };
        state.insert_seq += 1;
        let seq = state.insert_seq;
        state.order.insert(id.clone(), seq);
        state.natural_key.insert(key, id.clone());
        state.rows.insert(id.clone(), booking);

        Ok(UpsertOutcome {
            booking_id: id,
            change: UpsertChange::Created,
        })
    }

    async fn delete_stale_future(
        &self,
        subscription_id: &str,
        active_subscription_ids: &[String],
        now: NaiveDateTime,
    ) -> Result<u64> {
        if active_subscription_ids.iter().any(|id| id == subscription_id) {
            return Ok(0);
        }

        let mut state = self.inner.bookings.lock().await;
        let stale: Vec<(String, NaiveDateTime)> = state
            .rows
            .values()
            .filter(|b| {
                !b.deleted
                    && b.origin.subscription_id() == Some(subscription_id)
                    && b.start > now
            })
            .map(|b| (b.id.clone(), b.start))
            .collect();

        let count = stale.len() as u64;
        for (id, start) in stale {
            if let Some(booking) = state.rows.get_mut(&id) {
                booking.deleted = true;
            }
            state
                .natural_key
                .remove(&(subscription_id.to_string(), start));
        }
        Ok(count)
    }

    async fn get_booking(&self, booking_id: &str) -> Result<Option<Booking>> {
        Ok(self.inner.bookings.lock().await.rows.get(booking_id).cloned())
    }

    async fn list_subscription_bookings(&self, subscription_id: &str) -> Result<Vec<Booking>> {
        let state = self.inner.bookings.lock().await;
        let mut rows: Vec<Booking> = state
            .rows
            .values()
            .filter(|b| !b.deleted && b.origin.subscription_id() == Some(subscription_id))
            .cloned()
            .collect();
        rows.sort_by_key(|b| b.start);
        Ok(rows)
    }

    async fn known_subscription_ids(&self) -> Result<Vec<String>> {
        let state = self.inner.bookings.lock().await;
        let mut ids: Vec<String> = state
            .rows
            .values()
            .filter_map(|b| b.origin.subscription_id().map(str::to_string))
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn record_invoiced(
        &self,
        booking_id: &str,
        net_due_cents: i64,
        invoice_id: &str,
    ) -> Result<()> {
        let mut state = self.inner.bookings.lock().await;
        let booking = state
            .rows
            .get_mut(booking_id)
            .ok_or_else(|| PawsyncError::not_found(format!("booking {}", booking_id)))?;
        booking.price_cents = net_due_cents;
        booking.status = BookingStatus::Invoiced;
        booking.invoice_id = Some(invoice_id.to_string());
        Ok(())
    }

    async fn record_paid_by_credit(&self, booking_id: &str) -> Result<()> {
        let mut state = self.inner.bookings.lock().await;
        let booking = state
            .rows
            .get_mut(booking_id)
            .ok_or_else(|| PawsyncError::not_found(format!("booking {}", booking_id)))?;
        booking.price_cents = 0;
        booking.status = BookingStatus::PaidByCredit;
        booking.invoice_id = None;
        Ok(())
    }

    async fn set_hosted_invoice_url(&self, invoice_id: &str, url: &str) -> Result<u64> {
        let mut state = self.inner.bookings.lock().await;
        let mut count = 0;
        for booking in state.rows.values_mut() {
            if booking.invoice_id.as_deref() == Some(invoice_id) {
                booking.hosted_invoice_url = Some(url.to_string());
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>> {
        Ok(self.inner.clients.read().await.get(client_id).cloned())
    }

    async fn find_by_customer_ref(&self, customer_ref: &str) -> Result<Option<Client>> {
        let clients = self.inner.clients.read().await;
        Ok(clients
            .values()
            .find(|c| c.billing_customer_id.as_deref() == Some(customer_ref))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Client>> {
        let clients = self.inner.clients.read().await;
        Ok(clients
            .values()
            .find(|c| {
                c.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .cloned())
    }

    async fn insert_client(&self, client: &Client) -> Result<()> {
        let mut clients = self.inner.clients.write().await;
        if clients.contains_key(&client.id) {
            return Err(PawsyncError::ConstraintViolation(format!(
                "client {} already exists",
                client.id
            )));
        }
        clients.insert(client.id.clone(), client.clone());
        Ok(())
    }

    async fn set_billing_customer_id(&self, client_id: &str, customer_id: &str) -> Result<()> {
        let mut clients = self.inner.clients.write().await;
        let client = clients
            .get_mut(client_id)
            .ok_or_else(|| PawsyncError::not_found(format!("client {}", client_id)))?;
        client.billing_customer_id = Some(customer_id.to_string());
        Ok(())
    }

    async fn apply_credit(&self, client_id: &str, amount_due_cents: i64) -> Result<CreditOutcome> {
        if amount_due_cents < 0 {
            return Err(PawsyncError::ConstraintViolation(
                "amount due must be non-negative".to_string(),
            ));
        }
        // Read and deduct under one write lock so concurrent batches for
        // the same client serialize.
        let mut clients = self.inner.clients.write().await;
        let client = clients
            .get_mut(client_id)
            .ok_or_else(|| PawsyncError::not_found(format!("client {}", client_id)))?;
        let used = client.credit_cents.min(amount_due_cents);
        client.credit_cents -= used;
        Ok(CreditOutcome {
            used_cents: used,
            remaining_due_cents: amount_due_cents - used,
        })
    }

    async fn add_credit(&self, client_id: &str, amount_cents: i64) -> Result<i64> {
        if amount_cents < 0 {
            return Err(PawsyncError::ConstraintViolation(
                "credit top-up must be non-negative".to_string(),
            ));
        }
        let mut clients = self.inner.clients.write().await;
        let client = clients
            .get_mut(client_id)
            .ok_or_else(|| PawsyncError::not_found(format!("client {}", client_id)))?;
        client.credit_cents += amount_cents;
        Ok(client.credit_cents)
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn save_schedule(&self, subscription_id: &str, schedule: &ScheduleSpec) -> Result<()> {
        self.inner
            .schedules
            .write()
            .await
            .insert(subscription_id.to_string(), schedule.clone());
        Ok(())
    }

    async fn get_schedule(&self, subscription_id: &str) -> Result<Option<ScheduleSpec>> {
        Ok(self.inner.schedules.read().await.get(subscription_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceCode;
    use chrono::NaiveDate;

    fn occurrence(sub: &str, day: u32, price: i64) -> Occurrence {
        let date = NaiveDate::from_ymd_opt(2026, 9, day).unwrap();
        Occurrence {
            subscription_id: sub.to_string(),
            client_id: "cl_1".to_string(),
            service_code: ServiceCode::WalkShortSingle,
            start: date.and_hms_opt(9, 0, 0).unwrap(),
            end: date.and_hms_opt(10, 0, 0).unwrap(),
            location: "Bondi".to_string(),
            dogs: 1,
            notes: String::new(),
            price_cents: price,
        }
    }

    fn client(id: &str, credit: i64) -> Client {
        Client {
            id: id.to_string(),
            name: "Alex".to_string(),
            email: Some("alex@example.com".to_string()),
            phone: None,
            billing_customer_id: None,
            credit_cents: credit,
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let occ = occurrence("sub_1", 7, 2500);

        let first = store.upsert_occurrence(&occ).await.unwrap();
        assert_eq!(first.change, UpsertChange::Created);

        let second = store.upsert_occurrence(&occ).await.unwrap();
        assert_eq!(second.change, UpsertChange::Unchanged);
        assert_eq!(second.booking_id, first.booking_id);
        assert_eq!(store.all_bookings().await.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_updates_schedule_fields() {
        let store = MemoryStore::new();
        let occ = occurrence("sub_1", 7, 2500);
        let outcome = store.upsert_occurrence(&occ).await.unwrap();

        let mut changed = occ.clone();
        changed.location = "Manly".to_string();
        changed.dogs = 2;
        let updated = store.upsert_occurrence(&changed).await.unwrap();
        assert_eq!(updated.change, UpsertChange::Updated);

        let booking = store.get_booking(&outcome.booking_id).await.unwrap().unwrap();
        assert_eq!(booking.location, "Manly");
        assert_eq!(booking.dogs, 2);
    }

    #[tokio::test]
    async fn test_invoiced_row_is_frozen() {
        let store = MemoryStore::new();
        let occ = occurrence("sub_1", 7, 2500);
        let outcome = store.upsert_occurrence(&occ).await.unwrap();
        store
            .record_invoiced(&outcome.booking_id, 1000, "in_1")
            .await
            .unwrap();

        let mut changed = occ.clone();
        changed.location = "Manly".to_string();
        changed.price_cents = 9999;
        let second = store.upsert_occurrence(&changed).await.unwrap();
        assert_eq!(second.change, UpsertChange::Unchanged);

        let booking = store.get_booking(&outcome.booking_id).await.unwrap().unwrap();
        assert_eq!(booking.location, "Bondi");
        assert_eq!(booking.price_cents, 1000);
        assert_eq!(booking.invoice_id.as_deref(), Some("in_1"));
    }

    #[tokio::test]
    async fn test_paid_by_credit_price_not_reset_by_resync() {
        let store = MemoryStore::new();
        let occ = occurrence("sub_1", 7, 2500);
        let outcome = store.upsert_occurrence(&occ).await.unwrap();
        store.record_paid_by_credit(&outcome.booking_id).await.unwrap();

        store.upsert_occurrence(&occ).await.unwrap();
        let booking = store.get_booking(&outcome.booking_id).await.unwrap().unwrap();
        assert_eq!(booking.price_cents, 0);
        assert_eq!(booking.status, BookingStatus::PaidByCredit);
    }

    #[tokio::test]
    async fn test_delete_stale_future_spares_past_and_active() {
        let store = MemoryStore::new();
        // 2 past, 3 future relative to 2026-09-10
        for day in [1, 2, 15, 16, 17] {
            store.upsert_occurrence(&occurrence("sub_1", day, 0)).await.unwrap();
        }
        let now = NaiveDate::from_ymd_opt(2026, 9, 10)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();

        // still active: nothing removed
        let removed = store
            .delete_stale_future("sub_1", &["sub_1".to_string()], now)
            .await
            .unwrap();
        assert_eq!(removed, 0);

        // canceled: exactly the 3 future bookings go
        let removed = store.delete_stale_future("sub_1", &[], now).await.unwrap();
        assert_eq!(removed, 3);
        let remaining = store.list_subscription_bookings("sub_1").await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|b| b.start <= now));
    }

    #[tokio::test]
    async fn test_natural_key_reusable_after_soft_delete() {
        let store = MemoryStore::new();
        let occ = occurrence("sub_1", 15, 0);
        store.upsert_occurrence(&occ).await.unwrap();
        let now = NaiveDate::from_ymd_opt(2026, 9, 10)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        store.delete_stale_future("sub_1", &[], now).await.unwrap();

        // subscription re-activates: same slot materializes a fresh row
        let outcome = store.upsert_occurrence(&occ).await.unwrap();
        assert_eq!(outcome.change, UpsertChange::Created);
        assert_eq!(store.list_subscription_bookings("sub_1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_credit_never_negative() {
        let store = MemoryStore::new();
        store.seed_client(client("cl_1", 1000)).await;

        let outcome = store.apply_credit("cl_1", 2500).await.unwrap();
        assert_eq!(outcome.used_cents, 1000);
        assert_eq!(outcome.remaining_due_cents, 1500);

        let outcome = store.apply_credit("cl_1", 500).await.unwrap();
        assert_eq!(outcome.used_cents, 0);
        assert_eq!(outcome.remaining_due_cents, 500);

        let balance = store.get_client("cl_1").await.unwrap().unwrap().credit_cents;
        assert_eq!(balance, 0);
    }

    #[tokio::test]
    async fn test_add_credit() {
        let store = MemoryStore::new();
        store.seed_client(client("cl_1", 100)).await;
        let balance = store.add_credit("cl_1", 400).await.unwrap();
        assert_eq!(balance, 500);
        assert!(store.add_credit("cl_1", -1).await.is_err());
    }

    #[tokio::test]
    async fn test_find_by_email_is_case_insensitive() {
        let store = MemoryStore::new();
        store.seed_client(client("cl_1", 0)).await;
        let found = store.find_by_email("ALEX@Example.COM").await.unwrap();
        assert_eq!(found.unwrap().id, "cl_1");
        assert!(store.find_by_email("other@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_client_is_constraint_violation() {
        let store = MemoryStore::new();
        store.insert_client(&client("cl_1", 0)).await.unwrap();
        let err = store.insert_client(&client("cl_1", 0)).await.unwrap_err();
        assert!(matches!(err, PawsyncError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_schedule_shadow_round_trip() {
        let store = MemoryStore::new();
        let md: std::collections::HashMap<String, String> = [
            ("days", "MON"),
            ("start_time", "09:00"),
            ("end_time", "10:00"),
            ("dogs", "1"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let spec = ScheduleSpec::from_metadata("sub_1", &md).unwrap();

        assert!(store.get_schedule("sub_1").await.unwrap().is_none());
        store.save_schedule("sub_1", &spec).await.unwrap();
        assert_eq!(store.get_schedule("sub_1").await.unwrap(), Some(spec));
    }
}
