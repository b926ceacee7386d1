//! Pawsync - recurring booking materialization and billing reconciliation
//!
//! Pawsync turns billing-provider subscriptions into concrete calendar
//! bookings for a dog-walking business, keeps them reconciled as schedules
//! change, and bills each client through a single draft invoice per run,
//! applying account credit first.
//!
//! # Features
//!
//! - **Schedules**: weekday/time schedules parsed from subscription metadata
//! - **Materialization**: idempotent occurrence generation over a rolling horizon
//! - **Reconciliation**: natural-key upserts, stale-booking cleanup
//! - **Billing**: per-client invoice batching with credit application
//! - **Runner**: periodic background sync with graceful shutdown
//!
//! # Quick Start
//!
//! Requires the `test-support` feature for the mock provider, or the
//! `live-provider` feature for the real one.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pawsync::{Config, MemoryStore, MockBillingProvider, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() -> pawsync::Result<()> {
//!     pawsync::init_tracing();
//!
//!     let config = Config::from_env()?;
//!     let store = Arc::new(MemoryStore::new());
//!     let provider = Arc::new(MockBillingProvider::new());
//!
//!     let engine = SyncEngine::new(store, provider, config);
//!     let summary = engine.sync_all().await?;
//!     println!("created {} bookings", summary.bookings_created);
//!     Ok(())
//! }
//! ```

pub mod billing;
pub mod config;
pub mod error;
pub mod schedule;
pub mod service;
pub mod store;
pub mod sync;

pub use billing::{
    apply_batch_credit, BatchOutcome, BillingBatcher, BillingProvider, CreditApplication,
    FinalizedInvoice, ProviderSubscription, SubscriptionStatus,
};
#[cfg(feature = "live-provider")]
pub use billing::{LiveBillingProvider, LiveProviderConfig};
#[cfg(any(test, feature = "test-support"))]
pub use billing::MockBillingProvider;
pub use config::{BillingConfig, Config, LoggingConfig, SyncConfig};
pub use error::{PawsyncError, Result, SyncPhase};
pub use schedule::{generate, Occurrence, ScheduleSpec};
pub use service::ServiceCode;
pub use store::{
    Booking, BookingOrigin, BookingStatus, BookingStore, Client, ClientStore, CreditOutcome,
    MemoryStore, ScheduleStore, Store, UpsertChange, UpsertOutcome,
};
pub use sync::{RunSummary, SyncEngine, SyncRunner};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults
///
/// This should be called early in your application, typically in main().
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "pawsync=debug")
/// - `PAWSYNC_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("PAWSYNC_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing from an explicit configuration.
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::new(&config.logging.level);

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
