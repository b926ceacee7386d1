//! The reconciliation engine.
//!
//! One run walks every active subscription, materializes its occurrences
//! into bookings, soft-deletes future bookings of subscriptions that went
//! away, and bills each affected client in one batch. Failures on one
//! subscription never abort the run; only the initial fetch is fatal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::billing::{BillingBatcher, BillingProvider, ProviderSubscription};
use crate::config::Config;
use crate::error::{PawsyncError, Result, SyncPhase};
use crate::schedule::{generate, ScheduleSpec};
use crate::service::ServiceCode;
use crate::store::{BookingStatus, Client, Store, UpsertChange};

/// Counters for one engine run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub subscriptions_processed: u64,
    pub bookings_created: u64,
    pub bookings_updated: u64,
    pub bookings_cleaned: u64,
    pub errors_count: u64,
}

/// What processing one subscription produced.
struct SubscriptionOutcome {
    client_id: String,
    created: u64,
    updated: u64,
    /// Every booking of this subscription still awaiting billing, in date
    /// order. Picking these up from the store rather than from this run's
    /// upserts means a booking stranded by an earlier billing failure gets
    /// retried.
    affected_booking_ids: Vec<String>,
}

/// Materializes subscriptions into bookings and reconciles billing.
pub struct SyncEngine<S, P> {
    store: Arc<S>,
    provider: Arc<P>,
    batcher: BillingBatcher<S, P>,
    config: Config,
    cancel: Arc<AtomicBool>,
}

impl<S, P> SyncEngine<S, P>
where
    S: Store,
    P: BillingProvider,
{
    pub fn new(store: Arc<S>, provider: Arc<P>, config: Config) -> Self {
        let batcher = BillingBatcher::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            config.billing.clone(),
        );
        Self {
            store,
            provider,
            batcher,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for requesting cancellation of an in-flight run. The flag is
    /// checked between subscriptions, so the current one finishes cleanly.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run a full sync over the configured horizon, anchored at the current
    /// local date.
    pub async fn sync_all(&self) -> Result<RunSummary> {
        let reference = chrono::Local::now().naive_local();
        self.sync_all_from(reference, self.config.sync.horizon_days)
            .await
    }

    /// Run a full sync anchored at an explicit reference time.
    ///
    /// Occurrences are generated over `[reference.date(), reference.date()
    /// + horizon_days)`; `reference` itself is the cutoff for stale-booking
    /// cleanup.
    pub async fn sync_all_from(
        &self,
        reference: NaiveDateTime,
        horizon_days: u32,
    ) -> Result<RunSummary> {
        self.cancel.store(false, Ordering::SeqCst);
        let mut summary = RunSummary::default();

        info!(phase = %SyncPhase::Fetching, horizon_days, "sync run starting");
        let subscriptions = self.fetch_active_subscriptions().await?;
        let active_ids: Vec<String> = subscriptions.iter().map(|s| s.id.clone()).collect();

        info!(
            phase = %SyncPhase::Reconciling,
            subscription_count = subscriptions.len(),
            "materializing occurrences"
        );
        // client id -> billing batch, in first-touched order
        let mut batch_order: Vec<String> = Vec::new();
        let mut batches: HashMap<String, Vec<String>> = HashMap::new();

        for subscription in &subscriptions {
            if self.cancel.load(Ordering::SeqCst) {
                info!("cancellation requested, stopping before next subscription");
                break;
            }

            match self
                .process_subscription(subscription, reference, horizon_days)
                .await
            {
                Ok(outcome) => {
                    summary.subscriptions_processed += 1;
                    summary.bookings_created += outcome.created;
                    summary.bookings_updated += outcome.updated;
                    if !outcome.affected_booking_ids.is_empty() {
                        let batch = match batches.entry(outcome.client_id.clone()) {
                            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                            std::collections::hash_map::Entry::Vacant(e) => {
                                batch_order.push(outcome.client_id.clone());
                                e.insert(Vec::new())
                            }
                        };
                        batch.extend(outcome.affected_booking_ids);
                    }
                }
                Err(error) => {
                    summary.errors_count += 1;
                    warn!(
                        subscription_id = %subscription.id,
                        error = %error,
                        "subscription failed, continuing with the rest"
                    );
                }
            }
        }

        info!(phase = %SyncPhase::CleaningUp, "removing stale future bookings");
        match self.cleanup_stale(&active_ids, reference).await {
            Ok(cleaned) => summary.bookings_cleaned = cleaned,
            Err(error) => {
                summary.errors_count += 1;
                warn!(error = %error, "cleanup failed");
            }
        }

        info!(
            phase = %SyncPhase::Billing,
            client_count = batch_order.len(),
            "billing affected clients"
        );
        for client_id in &batch_order {
            let Some(booking_ids) = batches.get(client_id) else {
                continue;
            };
            if let Err(error) = self.bill_with_retry(client_id, booking_ids).await {
                summary.errors_count += 1;
                warn!(client_id = %client_id, error = %error, "billing batch failed");
            }
        }

        info!(
            phase = %SyncPhase::Idle,
            subscriptions_processed = summary.subscriptions_processed,
            bookings_created = summary.bookings_created,
            bookings_updated = summary.bookings_updated,
            bookings_cleaned = summary.bookings_cleaned,
            errors_count = summary.errors_count,
            "sync run finished"
        );
        Ok(summary)
    }

    /// Sync a single subscription by id, including its billing batch.
    /// Returns the number of bookings created or updated.
    pub async fn sync_one(&self, subscription_id: &str) -> Result<u64> {
        let subscriptions = self.fetch_active_subscriptions().await?;
        let subscription = subscriptions
            .iter()
            .find(|s| s.id == subscription_id)
            .ok_or_else(|| {
                PawsyncError::not_found(format!("active subscription {}", subscription_id))
            })?;

        let reference = chrono::Local::now().naive_local();
        let outcome = self
            .process_subscription(subscription, reference, self.config.sync.horizon_days)
            .await?;
        let touched = outcome.created + outcome.updated;

        if !outcome.affected_booking_ids.is_empty() {
            self.bill_with_retry(&outcome.client_id, &outcome.affected_booking_ids)
                .await?;
        }
        Ok(touched)
    }

    /// The initial provider fetch. A failure here is fatal for the run.
    async fn fetch_active_subscriptions(&self) -> Result<Vec<ProviderSubscription>> {
        let subscriptions = self.provider.list_active_subscriptions().await?;
        Ok(subscriptions
            .into_iter()
            .filter(|s| s.status.is_active())
            .collect())
    }

    async fn process_subscription(
        &self,
        subscription: &ProviderSubscription,
        reference: NaiveDateTime,
        horizon_days: u32,
    ) -> Result<SubscriptionOutcome> {
        let service_code = subscription
            .service_code
            .as_deref()
            .ok_or_else(|| PawsyncError::UnknownServiceCode("<missing>".to_string()))
            .and_then(ServiceCode::from_code)?;

        let schedule = self.resolve_schedule(subscription).await?;
        let client = self.resolve_client(subscription).await?;

        let occurrences = generate(
            &subscription.id,
            &client.id,
            service_code,
            &schedule,
            horizon_days,
            reference.date(),
        )?;

        let mut outcome = SubscriptionOutcome {
            client_id: client.id,
            created: 0,
            updated: 0,
            affected_booking_ids: Vec::new(),
        };
        for occurrence in &occurrences {
            let upsert = self.store.upsert_occurrence(occurrence).await?;
            match upsert.change {
                UpsertChange::Created => outcome.created += 1,
                UpsertChange::Updated => outcome.updated += 1,
                UpsertChange::Unchanged => {}
            }
        }

        outcome.affected_booking_ids = self
            .store
            .list_subscription_bookings(&subscription.id)
            .await?
            .into_iter()
            .filter(|b| !b.deleted && b.status == BookingStatus::Scheduled)
            .map(|b| b.id)
            .collect();

        debug!(
            subscription_id = %subscription.id,
            occurrences = occurrences.len(),
            created = outcome.created,
            updated = outcome.updated,
            "subscription reconciled"
        );
        Ok(outcome)
    }

    /// Parse the schedule from provider metadata, falling back to the last
    /// good local copy when the metadata has gone unreadable.
    async fn resolve_schedule(
        &self,
        subscription: &ProviderSubscription,
    ) -> Result<ScheduleSpec> {
        match ScheduleSpec::from_metadata(&subscription.id, &subscription.metadata) {
            Ok(schedule) => {
                self.store
                    .save_schedule(&subscription.id, &schedule)
                    .await?;
                Ok(schedule)
            }
            Err(parse_error) => match self.store.get_schedule(&subscription.id).await? {
                Some(stored) => {
                    warn!(
                        subscription_id = %subscription.id,
                        error = %parse_error,
                        "metadata unreadable, using stored schedule"
                    );
                    Ok(stored)
                }
                None => Err(parse_error),
            },
        }
    }

    /// Find the local client behind a subscription, creating a placeholder
    /// when neither the customer reference nor the email matches.
    async fn resolve_client(&self, subscription: &ProviderSubscription) -> Result<Client> {
        if let Some(client) = self
            .store
            .find_by_customer_ref(&subscription.customer_ref)
            .await?
        {
            return Ok(client);
        }

        if let Some(email) = &subscription.customer_email {
            if let Some(client) = self.store.find_by_email(email).await? {
                // learned the link, persist it for next time
                if client.billing_customer_id.is_none() {
                    self.store
                        .set_billing_customer_id(&client.id, &subscription.customer_ref)
                        .await?;
                }
                return Ok(Client {
                    billing_customer_id: Some(subscription.customer_ref.clone()),
                    ..client
                });
            }
        }

        let name = subscription
            .customer_name
            .clone()
            .or_else(|| subscription.customer_email.clone())
            .unwrap_or_else(|| format!("customer {}", subscription.customer_ref));
        let client = Client {
            id: Uuid::new_v4().to_string(),
            name,
            email: subscription.customer_email.clone(),
            phone: None,
            billing_customer_id: Some(subscription.customer_ref.clone()),
            credit_cents: 0,
            notes: "created automatically during subscription sync".to_string(),
        };
        self.store.insert_client(&client).await?;
        info!(
            client_id = %client.id,
            customer_ref = %subscription.customer_ref,
            "created placeholder client for unmatched subscription"
        );
        Ok(client)
    }

    /// Soft-delete future bookings of every known subscription that is no
    /// longer active. Runs over every subscription the store has ever seen,
    /// so a cancellation between runs is still noticed.
    async fn cleanup_stale(
        &self,
        active_ids: &[String],
        reference: NaiveDateTime,
    ) -> Result<u64> {
        let mut cleaned = 0;
        for subscription_id in self.store.known_subscription_ids().await? {
            cleaned += self
                .store
                .delete_stale_future(&subscription_id, active_ids, reference)
                .await?;
        }
        Ok(cleaned)
    }

    /// Bill one client's batch, retrying once when the credit balance moved
    /// under us between the read and the deduct.
    async fn bill_with_retry(&self, client_id: &str, booking_ids: &[String]) -> Result<()> {
        match self.batcher.bill_client_batch(client_id, booking_ids).await {
            Err(PawsyncError::CreditRace { .. }) => {
                warn!(client_id = %client_id, "credit balance changed mid-batch, retrying once");
                self.batcher
                    .bill_client_batch(client_id, booking_ids)
                    .await?;
                Ok(())
            }
            Err(error) => Err(error),
            Ok(_) => Ok(()),
        }
    }
}
