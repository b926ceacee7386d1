//! Recurring schedules and their expansion into dated occurrences.

mod occurrence;
mod spec;

pub use occurrence::{generate, Occurrence};
pub use spec::ScheduleSpec;
