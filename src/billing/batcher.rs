//! Per-client billing batches.
//!
//! One batch covers every booking a sync run touched for one client. The
//! batch applies credit first, then lazily ensures a single draft invoice
//! and pushes one line item per booking that still owes money.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::BillingConfig;
use crate::error::{PawsyncError, Result};
use crate::store::{BookingStore, BookingStatus, ClientStore};

use super::credit::apply_batch_credit;
use super::provider::BillingProvider;

/// What a batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// The single draft invoice touched by this batch, when any booking
    /// had a positive amount due.
    pub invoice_id: Option<String>,
    pub hosted_url: Option<String>,
    pub bookings_invoiced: u64,
    pub bookings_paid_by_credit: u64,
    pub credit_used_cents: i64,
    pub invoiced_total_cents: i64,
}

/// Drives credit application and invoicing for one client at a time.
pub struct BillingBatcher<S, P> {
    store: Arc<S>,
    provider: Arc<P>,
    config: BillingConfig,
}

impl<S, P> BillingBatcher<S, P>
where
    S: BookingStore + ClientStore,
    P: BillingProvider,
{
    pub fn new(store: Arc<S>, provider: Arc<P>, config: BillingConfig) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Bill one client's batch of bookings, in the order given.
    ///
    /// Only bookings still in `scheduled` state participate; anything
    /// already invoiced or paid by credit is skipped, which makes a retried
    /// batch safe. The draft invoice is created lazily, at the first
    /// booking with a positive post-credit due, and reused for the rest of
    /// the batch.
    pub async fn bill_client_batch(
        &self,
        client_id: &str,
        booking_ids: &[String],
    ) -> Result<BatchOutcome> {
        let mut billable = Vec::new();
        for booking_id in booking_ids {
            let booking = self
                .store
                .get_booking(booking_id)
                .await?
                .ok_or_else(|| PawsyncError::not_found(format!("booking {}", booking_id)))?;
            if booking.deleted || booking.status != BookingStatus::Scheduled {
                continue;
            }
            billable.push(booking);
        }

        if billable.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let amounts: Vec<(String, i64)> = billable
            .iter()
            .map(|b| (b.id.clone(), b.price_cents))
            .collect();
        let applications = apply_batch_credit(self.store.as_ref(), client_id, &amounts).await?;

        let mut outcome = BatchOutcome {
            credit_used_cents: applications.iter().map(|a| a.used_cents).sum(),
            ..BatchOutcome::default()
        };
        let mut invoice_id: Option<String> = None;

        // Credit was deducted for the whole batch. If a provider call fails
        // mid-batch the unrecorded bookings stay scheduled at face price, so
        // their share of the deduction must go back on the balance; the next
        // run re-applies it against the same face price.
        let mut settled = 0;
        let mut failure: Option<PawsyncError> = None;
        for (booking, application) in billable.iter().zip(&applications) {
            match self
                .settle_booking(client_id, booking, application, &mut invoice_id, &mut outcome)
                .await
            {
                Ok(()) => settled += 1,
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }
        if let Some(error) = failure {
            let unsettled_credit: i64 = applications[settled..]
                .iter()
                .map(|a| a.used_cents)
                .sum();
            if unsettled_credit > 0 {
                self.store.add_credit(client_id, unsettled_credit).await?;
                debug!(
                    client_id = %client_id,
                    refunded_cents = unsettled_credit,
                    "returned credit for bookings the failed batch never settled"
                );
            }
            return Err(error);
        }

        if let Some(invoice) = &invoice_id {
            if self.config.auto_finalize {
                let finalized = self.provider.finalize_invoice(invoice).await?;
                if let Some(url) = &finalized.hosted_url {
                    self.store.set_hosted_invoice_url(invoice, url).await?;
                    outcome.hosted_url = Some(url.clone());
                }
            }
            info!(
                client_id = %client_id,
                invoice_id = %invoice,
                invoiced = outcome.bookings_invoiced,
                paid_by_credit = outcome.bookings_paid_by_credit,
                total_cents = outcome.invoiced_total_cents,
                "client batch billed"
            );
        }
        outcome.invoice_id = invoice_id;

        Ok(outcome)
    }

    /// Settle one booking of the batch: mark it paid by credit, or push a
    /// line item for the post-credit due and record the invoice link.
    async fn settle_booking(
        &self,
        client_id: &str,
        booking: &crate::store::Booking,
        application: &super::credit::CreditApplication,
        invoice_id: &mut Option<String>,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        if application.is_fully_covered() {
            self.store.record_paid_by_credit(&booking.id).await?;
            outcome.bookings_paid_by_credit += 1;
            debug!(
                booking_id = %booking.id,
                credit_used = application.used_cents,
                "booking fully covered by credit"
            );
            return Ok(());
        }

        let invoice = match invoice_id {
            Some(id) => id.clone(),
            None => {
                let id = self.ensure_invoice(client_id).await?;
                *invoice_id = Some(id.clone());
                id
            }
        };

        let key = format!("invitem:{}:{}", invoice, booking.id);
        let description = format!(
            "{} on {}",
            booking.service_label,
            booking.start.format("%Y-%m-%d")
        );
        self.provider
            .push_invoice_line_item(&invoice, &key, application.due_cents, &description)
            .await?;
        self.store
            .record_invoiced(&booking.id, application.due_cents, &invoice)
            .await?;
        outcome.bookings_invoiced += 1;
        outcome.invoiced_total_cents += application.due_cents;
        Ok(())
    }

    /// Resolve the provider customer for the client, keep the link in the
    /// store, and open (or reuse) the draft invoice.
    async fn ensure_invoice(&self, client_id: &str) -> Result<String> {
        let client = self
            .store
            .get_client(client_id)
            .await?
            .ok_or_else(|| PawsyncError::not_found(format!("client {}", client_id)))?;

        let customer_id = self.provider.ensure_customer(&client).await?;
        if client.billing_customer_id.as_deref() != Some(customer_id.as_str()) {
            self.store
                .set_billing_customer_id(client_id, &customer_id)
                .await?;
        }

        self.provider.create_or_reuse_draft_invoice(&customer_id).await
    }
}
