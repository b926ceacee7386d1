//! Batch credit application.
//!
//! Credit is deducted exactly once per client batch, then distributed
//! across the batch's bookings in creation order so earlier bookings are
//! paid first. Two concurrent batches can never spend the same credit
//! because the deduction itself is a single atomic store operation.

use tracing::debug;

use crate::error::Result;
use crate::store::ClientStore;

/// How one booking's amount due was split between credit and invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditApplication {
    pub booking_id: String,
    /// Face amount before credit.
    pub amount_cents: i64,
    pub used_cents: i64,
    /// What is left to invoice. `used + due == amount` always holds.
    pub due_cents: i64,
}

impl CreditApplication {
    /// Fully covered by credit, never to be invoiced.
    #[must_use]
    pub fn is_fully_covered(&self) -> bool {
        self.due_cents == 0
    }
}

/// Apply the client's credit across a batch of `(booking_id, amount_cents)`
/// pairs, in the order given.
///
/// Makes one atomic deduction for the whole batch and then allocates the
/// used credit front-to-back. An empty batch touches nothing.
pub async fn apply_batch_credit<S>(
    store: &S,
    client_id: &str,
    batch: &[(String, i64)],
) -> Result<Vec<CreditApplication>>
where
    S: ClientStore + ?Sized,
{
    if batch.is_empty() {
        return Ok(Vec::new());
    }

    let total: i64 = batch.iter().map(|(_, amount)| amount).sum();
    let outcome = store.apply_credit(client_id, total).await?;
    debug!(
        client_id = %client_id,
        total_due = total,
        credit_used = outcome.used_cents,
        "applied batch credit"
    );

    let mut remaining = outcome.used_cents;
    let applications = batch
        .iter()
        .map(|(booking_id, amount)| {
            let used = remaining.min(*amount);
            remaining -= used;
            CreditApplication {
                booking_id: booking_id.clone(),
                amount_cents: *amount,
                used_cents: used,
                due_cents: amount - used,
            }
        })
        .collect();

    Ok(applications)
}
