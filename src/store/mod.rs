//! Persistence traits for bookings, clients, and schedule shadows.
//!
//! Implement these traits to persist engine state to your database. An
//! in-memory implementation is provided and is good enough for small
//! single-process deployments.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schedule::{Occurrence, ScheduleSpec};
use crate::service::ServiceCode;

// =============================================================================
// Records
// =============================================================================

/// Where a booking came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BookingOrigin {
    /// Entered by hand through the office UI.
    Manual,
    /// Materialized from the given subscription.
    Subscription(String),
}

impl BookingOrigin {
    /// The owning subscription id, for subscription-origin bookings.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            BookingOrigin::Manual => None,
            BookingOrigin::Subscription(id) => Some(id),
        }
    }
}

impl From<BookingOrigin> for String {
    fn from(origin: BookingOrigin) -> Self {
        match origin {
            BookingOrigin::Manual => "manual".to_string(),
            BookingOrigin::Subscription(id) => format!("subscription:{}", id),
        }
    }
}

impl TryFrom<String> for BookingOrigin {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s == "manual" {
            Ok(BookingOrigin::Manual)
        } else if let Some(id) = s.strip_prefix("subscription:") {
            Ok(BookingOrigin::Subscription(id.to_string()))
        } else {
            Err(format!("unrecognized booking origin: '{}'", s))
        }
    }
}

/// Lifecycle status of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Materialized, not yet billed.
    Scheduled,
    /// On a draft or finalized invoice.
    Invoiced,
    /// Fully covered by account credit, never linked to an invoice.
    PaidByCredit,
    /// Service was delivered.
    Completed,
    /// Canceled by the client or the office.
    Canceled,
}

impl BookingStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Invoiced => "invoiced",
            Self::PaidByCredit => "paid_by_credit",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted unit of work.
///
/// Subscription-origin bookings carry a natural key of
/// (origin subscription id, start timestamp); at most one non-deleted row
/// exists per natural key. `price_cents` holds the amount still due after
/// credit, never the pre-credit face value, once billing has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub client_id: String,
    pub service_code: ServiceCode,
    /// Human label as shown on invoices and the calendar.
    pub service_label: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub location: String,
    pub dogs: u32,
    pub notes: String,
    pub price_cents: i64,
    pub status: BookingStatus,
    pub origin: BookingOrigin,
    pub invoice_id: Option<String>,
    pub hosted_invoice_url: Option<String>,
    pub deleted: bool,
}

impl Booking {
    /// True once the row is referenced by an external invoice. Invoiced rows
    /// are frozen against later schedule edits.
    #[must_use]
    pub fn is_invoiced(&self) -> bool {
        self.invoice_id.is_some()
    }
}

/// A client of the business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// External billing-provider customer id, once linked.
    pub billing_customer_id: Option<String>,
    /// Account credit balance. Never negative.
    pub credit_cents: i64,
    pub notes: String,
}

/// What an upsert did to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertChange {
    Created,
    Updated,
    /// Row exists and was left alone (no field drift, or frozen by an
    /// attached invoice).
    Unchanged,
}

/// Result of upserting one occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub booking_id: String,
    pub change: UpsertChange,
}

/// Outcome of one atomic credit application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditOutcome {
    pub used_cents: i64,
    pub remaining_due_cents: i64,
}

// =============================================================================
// Traits
// =============================================================================

/// Booking persistence with natural-key reconciliation.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Insert or update the booking for one occurrence.
    ///
    /// Lookup is by natural key (subscription id, start timestamp) over
    /// non-deleted rows. On a hit, schedule-authoritative fields (end
    /// timestamp, location, dogs, notes) are updated in place and the row
    /// id is returned; price and any attached invoice id are preserved, and
    /// a row with an invoice attached is not touched at all. On a miss a
    /// new `scheduled` row is inserted.
    ///
    /// A natural-key collision raised by a concurrent insert must be
    /// converted into the update path, not surfaced as an error.
    async fn upsert_occurrence(&self, occurrence: &Occurrence) -> Result<UpsertOutcome>;

    /// Soft-delete future bookings of the given subscription when it is no
    /// longer in `active_subscription_ids`. Bookings starting at or before
    /// `now` are never touched; history stays intact for reporting.
    /// Returns the number of bookings removed.
    async fn delete_stale_future(
        &self,
        subscription_id: &str,
        active_subscription_ids: &[String],
        now: NaiveDateTime,
    ) -> Result<u64>;

    async fn get_booking(&self, booking_id: &str) -> Result<Option<Booking>>;

    /// All non-deleted bookings materialized from the given subscription,
    /// in start order.
    async fn list_subscription_bookings(&self, subscription_id: &str) -> Result<Vec<Booking>>;

    /// Every subscription id that has ever materialized a booking locally.
    /// Cleanup runs against this set so cancellations between syncs are
    /// still noticed.
    async fn known_subscription_ids(&self) -> Result<Vec<String>>;

    /// Record the billing outcome for a booking that landed on an invoice:
    /// store the post-credit amount due and link the invoice.
    async fn record_invoiced(
        &self,
        booking_id: &str,
        net_due_cents: i64,
        invoice_id: &str,
    ) -> Result<()>;

    /// Record that a booking was fully covered by account credit.
    async fn record_paid_by_credit(&self, booking_id: &str) -> Result<()>;

    /// Attach the hosted URL to every booking linked to the invoice.
    /// Returns the number of bookings updated.
    async fn set_hosted_invoice_url(&self, invoice_id: &str, url: &str) -> Result<u64>;
}

/// Client lookup, creation, and the credit ledger.
#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>>;

    async fn find_by_customer_ref(&self, customer_ref: &str) -> Result<Option<Client>>;

    /// Case-insensitive email lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<Client>>;

    async fn insert_client(&self, client: &Client) -> Result<()>;

    async fn set_billing_customer_id(&self, client_id: &str, customer_id: &str) -> Result<()>;

    /// Atomically read the balance, deduct `min(balance, amount_due_cents)`,
    /// and return what was used and what remains due. The read and deduct
    /// are one critical section; the balance never goes negative.
    async fn apply_credit(&self, client_id: &str, amount_due_cents: i64) -> Result<CreditOutcome>;

    /// Operator top-up. Returns the new balance.
    async fn add_credit(&self, client_id: &str, amount_cents: i64) -> Result<i64>;
}

/// Local shadow of each subscription's parsed schedule.
///
/// Saved on every successful metadata parse so materialization keeps working
/// when the provider's metadata is temporarily unreadable.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn save_schedule(&self, subscription_id: &str, schedule: &ScheduleSpec) -> Result<()>;

    async fn get_schedule(&self, subscription_id: &str) -> Result<Option<ScheduleSpec>>;
}

/// Everything the sync engine needs from persistence.
pub trait Store: BookingStore + ClientStore + ScheduleStore {}

impl<T: BookingStore + ClientStore + ScheduleStore> Store for T {}
