//! The narrow contract consumed from the external billing provider.
//!
//! The engine never touches the provider SDK surface directly; everything
//! it needs is behind [`BillingProvider`] so tests can run against the mock
//! and production against the live client.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::Client;

/// A subscription as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSubscription {
    /// Opaque provider id, e.g. `sub_...`.
    pub id: String,
    /// Provider customer reference owning the subscription.
    pub customer_ref: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub status: SubscriptionStatus,
    /// Canonical service code carried on the subscribed price, when set.
    pub service_code: Option<String>,
    /// Free-form metadata holding the schedule.
    pub metadata: HashMap<String, String>,
}

/// Subscription status at the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Paused,
    Unpaid,
}

impl SubscriptionStatus {
    /// Parse from the provider's status string.
    #[must_use]
    pub fn from_provider(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            "paused" => Self::Paused,
            "unpaid" => Self::Unpaid,
            // Unknown statuses never materialize bookings
            _ => Self::Canceled,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Paused => "paused",
            Self::Unpaid => "unpaid",
        }
    }

    /// Active and trialing subscriptions both materialize bookings.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of finalizing an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedInvoice {
    pub status: String,
    pub hosted_url: Option<String>,
}

/// Operations the engine needs from the billing provider.
///
/// Every failure maps to `PawsyncError::Provider` and is retryable at the
/// next scheduled run; implementations must never swallow errors.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// The full set of currently active and trialing subscriptions.
    async fn list_active_subscriptions(&self) -> Result<Vec<ProviderSubscription>>;

    /// Return the provider customer id for a client, creating the customer
    /// when none exists yet.
    async fn ensure_customer(&self, client: &Client) -> Result<String>;

    /// Return an existing open draft invoice for the customer, or create a
    /// new one.
    async fn create_or_reuse_draft_invoice(&self, customer_id: &str) -> Result<String>;

    /// Add a line item to a draft invoice. `idempotency_key` makes retries
    /// safe; pushing the same key twice must not double-bill.
    async fn push_invoice_line_item(
        &self,
        invoice_id: &str,
        idempotency_key: &str,
        amount_cents: i64,
        description: &str,
    ) -> Result<()>;

    /// Finalize a draft invoice, returning its status and hosted URL.
    async fn finalize_invoice(&self, invoice_id: &str) -> Result<FinalizedInvoice>;
}

/// Mock billing provider for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use crate::error::PawsyncError;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MockLineItem {
        pub idempotency_key: String,
        pub amount_cents: i64,
        pub description: String,
    }

    #[derive(Default)]
    struct MockState {
        subscriptions: Vec<ProviderSubscription>,
        /// client id -> customer id, for customers this mock created.
        customers: HashMap<String, String>,
        /// customer id -> open draft invoice id.
        open_invoices: HashMap<String, String>,
        line_items: HashMap<String, Vec<MockLineItem>>,
        seen_keys: HashSet<String>,
        finalized: HashSet<String>,
        /// Operation names that should fail on their next call.
        failing: HashSet<String>,
    }

    /// In-memory stand-in for the live provider.
    ///
    /// Reuses open drafts per customer, dedupes line items by idempotency
    /// key, and counts invoice creations so tests can assert the
    /// one-invoice-per-batch property.
    #[derive(Default)]
    pub struct MockBillingProvider {
        state: Mutex<MockState>,
        customer_counter: AtomicU64,
        invoice_counter: AtomicU64,
        invoice_create_calls: AtomicU64,
    }

    impl MockBillingProvider {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_subscription(&self, subscription: ProviderSubscription) {
            self.state.lock().unwrap().subscriptions.push(subscription);
        }

        pub fn clear_subscriptions(&self) {
            self.state.lock().unwrap().subscriptions.clear();
        }

        /// Make the named operation fail on every call until cleared.
        pub fn fail_on(&self, operation: &str) {
            self.state.lock().unwrap().failing.insert(operation.to_string());
        }

        pub fn clear_failures(&self) {
            self.state.lock().unwrap().failing.clear();
        }

        /// How many invoices were actually created (reuse does not count).
        pub fn invoice_create_count(&self) -> u64 {
            self.invoice_create_calls.load(Ordering::SeqCst)
        }

        pub fn line_items(&self, invoice_id: &str) -> Vec<MockLineItem> {
            self.state
                .lock()
                .unwrap()
                .line_items
                .get(invoice_id)
                .cloned()
                .unwrap_or_default()
        }

        pub fn is_finalized(&self, invoice_id: &str) -> bool {
            self.state.lock().unwrap().finalized.contains(invoice_id)
        }

        fn check_failure(&self, operation: &str) -> Result<()> {
            if self.state.lock().unwrap().failing.contains(operation) {
                return Err(PawsyncError::provider(operation, "injected failure"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BillingProvider for MockBillingProvider {
        async fn list_active_subscriptions(&self) -> Result<Vec<ProviderSubscription>> {
            self.check_failure("list_subscriptions")?;
            let state = self.state.lock().unwrap();
            Ok(state
                .subscriptions
                .iter()
                .filter(|s| s.status.is_active())
                .cloned()
                .collect())
        }

        async fn ensure_customer(&self, client: &Client) -> Result<String> {
            self.check_failure("ensure_customer")?;
            if let Some(existing) = &client.billing_customer_id {
                return Ok(existing.clone());
            }
            let mut state = self.state.lock().unwrap();
            if let Some(existing) = state.customers.get(&client.id) {
                return Ok(existing.clone());
            }
            let n = self.customer_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("cus_test_{}", n);
            state.customers.insert(client.id.clone(), id.clone());
            Ok(id)
        }

        async fn create_or_reuse_draft_invoice(&self, customer_id: &str) -> Result<String> {
            self.check_failure("create_invoice")?;
            let mut state = self.state.lock().unwrap();
            if let Some(existing) = state.open_invoices.get(customer_id) {
                return Ok(existing.clone());
            }
            let n = self.invoice_counter.fetch_add(1, Ordering::SeqCst) + 1;
            self.invoice_create_calls.fetch_add(1, Ordering::SeqCst);
            let id = format!("in_test_{}", n);
            state.open_invoices.insert(customer_id.to_string(), id.clone());
            Ok(id)
        }

        async fn push_invoice_line_item(
            &self,
            invoice_id: &str,
            idempotency_key: &str,
            amount_cents: i64,
            description: &str,
        ) -> Result<()> {
            self.check_failure("push_line_item")?;
            let mut state = self.state.lock().unwrap();
            if !state.seen_keys.insert(idempotency_key.to_string()) {
                // retried call, already applied
                return Ok(());
            }
            state
                .line_items
                .entry(invoice_id.to_string())
                .or_default()
                .push(MockLineItem {
                    idempotency_key: idempotency_key.to_string(),
                    amount_cents,
                    description: description.to_string(),
                });
            Ok(())
        }

        async fn finalize_invoice(&self, invoice_id: &str) -> Result<FinalizedInvoice> {
            self.check_failure("finalize_invoice")?;
            let mut state = self.state.lock().unwrap();
            state.finalized.insert(invoice_id.to_string());
            state.open_invoices.retain(|_, v| v != invoice_id);
            Ok(FinalizedInvoice {
                status: "open".to_string(),
                hosted_url: Some(format!("https://pay.example.com/{}", invoice_id)),
            })
        }
    }
}
