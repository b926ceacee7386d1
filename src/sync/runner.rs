//! Periodic sync runner.
//!
//! Runs the engine on a fixed interval until shutdown is requested via the
//! shutdown channel. An in-flight run is asked to cancel and allowed to
//! finish its current subscription.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use crate::billing::BillingProvider;
use crate::config::Config;
use crate::store::Store;

use super::engine::SyncEngine;

/// Drives [`SyncEngine`] on a schedule.
pub struct SyncRunner<S, P> {
    engine: Arc<SyncEngine<S, P>>,
    config: Config,
    shutdown_tx: mpsc::Sender<()>,
}

impl<S, P> SyncRunner<S, P>
where
    S: Store + 'static,
    P: BillingProvider + 'static,
{
    /// Create a runner and the receiver half of its shutdown channel.
    pub fn new(engine: Arc<SyncEngine<S, P>>, config: Config) -> (Self, mpsc::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Self {
                engine,
                config,
                shutdown_tx,
            },
            shutdown_rx,
        )
    }

    /// Handle for requesting shutdown from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run until shutdown is requested.
    ///
    /// When `run_on_startup` is set, the first run covers the wider startup
    /// horizon so a service that was down for a while backfills the gap.
    /// Subsequent runs use the regular horizon.
    pub async fn start(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            interval_secs = self.config.sync.interval_secs,
            "sync runner started"
        );

        if self.config.sync.run_on_startup {
            let reference = chrono::Local::now().naive_local();
            self.run_once(reference, self.config.sync.startup_horizon_days)
                .await;
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping sync runner");
                    self.engine.cancel_flag().store(true, Ordering::SeqCst);
                    break;
                }
                _ = sleep(Duration::from_secs(self.config.sync.interval_secs)) => {
                    let reference = chrono::Local::now().naive_local();
                    self.run_once(reference, self.config.sync.horizon_days).await;
                }
            }
        }

        info!("sync runner stopped");
    }

    async fn run_once(&self, reference: chrono::NaiveDateTime, horizon_days: u32) {
        match self.engine.sync_all_from(reference, horizon_days).await {
            Ok(summary) => {
                info!(
                    subscriptions_processed = summary.subscriptions_processed,
                    bookings_created = summary.bookings_created,
                    bookings_updated = summary.bookings_updated,
                    bookings_cleaned = summary.bookings_cleaned,
                    errors_count = summary.errors_count,
                    "scheduled sync run complete"
                );
            }
            Err(e) => {
                error!(error = %e, "scheduled sync run failed");
            }
        }
    }

    /// Spawn the runner on the current tokio runtime. Returns the task
    /// handle and a shutdown sender.
    pub fn spawn(
        engine: Arc<SyncEngine<S, P>>,
        config: Config,
    ) -> (tokio::task::JoinHandle<()>, mpsc::Sender<()>) {
        let (runner, shutdown_rx) = Self::new(engine, config);
        let shutdown_tx = runner.shutdown_handle();
        let handle = tokio::spawn(async move {
            runner.start(shutdown_rx).await;
        });
        (handle, shutdown_tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{MockBillingProvider, ProviderSubscription, SubscriptionStatus};
    use crate::store::MemoryStore;
    use std::collections::HashMap;

    fn subscription(id: &str) -> ProviderSubscription {
        let mut metadata = HashMap::new();
        metadata.insert("days".to_string(), "MON".to_string());
        metadata.insert("start_time".to_string(), "09:00".to_string());
        metadata.insert("end_time".to_string(), "10:00".to_string());
        metadata.insert("location".to_string(), "Carlton".to_string());
        metadata.insert("dogs".to_string(), "1".to_string());
        ProviderSubscription {
            id: id.to_string(),
            customer_ref: "cus_1".to_string(),
            customer_email: Some("cus_1@example.com".to_string()),
            customer_name: None,
            status: SubscriptionStatus::Active,
            service_code: Some("WALK_SHORT_SINGLE".to_string()),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_startup_run_then_clean_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockBillingProvider::new());
        provider.push_subscription(subscription("sub_1"));

        let config = Config::default();
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            config.clone(),
        ));
        let (handle, shutdown_tx) = SyncRunner::spawn(engine, config);

        // let the startup run finish, then stop
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();

        assert!(!store.all_bookings().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_startup_run_when_disabled() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockBillingProvider::new());
        provider.push_subscription(subscription("sub_1"));

        let mut config = Config::default();
        config.sync.run_on_startup = false;
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            config.clone(),
        ));
        let (handle, shutdown_tx) = SyncRunner::spawn(engine, config);

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();

        assert!(store.all_bookings().await.is_empty());
    }
}
