//! Billing: provider abstraction, credit application, and invoice batching.
//!
//! [`BillingProvider`] is the seam between the sync engine and the payment
//! platform. [`BillingBatcher`] turns a client's batch of affected bookings
//! into at most one draft invoice, after account credit has been applied.

mod batcher;
mod credit;
#[cfg(feature = "live-provider")]
mod live;
mod provider;

pub use batcher::{BatchOutcome, BillingBatcher};
pub use credit::{apply_batch_credit, CreditApplication};
#[cfg(feature = "live-provider")]
pub use live::{LiveBillingProvider, LiveProviderConfig};
pub use provider::{
    BillingProvider, FinalizedInvoice, ProviderSubscription, SubscriptionStatus,
};

#[cfg(any(test, feature = "test-support"))]
pub use provider::test::MockBillingProvider;
