//! Subscription sync: the reconciliation engine and its periodic runner.

mod engine;
mod runner;

pub use engine::{RunSummary, SyncEngine};
pub use runner::SyncRunner;
