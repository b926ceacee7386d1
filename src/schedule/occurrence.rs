use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};

use crate::error::{PawsyncError, Result};
use crate::service::ServiceCode;

use super::ScheduleSpec;

/// One concrete dated instance of a recurring schedule, ready for the
/// booking store upsert. Timestamps are naive local time in the business's
/// fixed timezone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub subscription_id: String,
    pub client_id: String,
    pub service_code: ServiceCode,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub location: String,
    pub dogs: u32,
    pub notes: String,
    /// Face price carried from the schedule, before any credit is applied.
    pub price_cents: i64,
}

/// Expand a schedule into dated occurrences.
///
/// Covers each date in `[reference_date, reference_date + horizon_days)`
/// whose weekday the schedule includes. When the time window wraps past
/// midnight, or the service itself is overnight, the end lands on the next
/// calendar day. Output is in date order. Pure: same inputs always produce
/// the same occurrences.
pub fn generate(
    subscription_id: &str,
    client_id: &str,
    service_code: ServiceCode,
    schedule: &ScheduleSpec,
    horizon_days: u32,
    reference_date: NaiveDate,
) -> Result<Vec<Occurrence>> {
    if schedule.days.is_empty() {
        return Err(PawsyncError::invalid_schedule(
            subscription_id,
            "days list is empty",
        ));
    }
    if schedule.dogs < 1 {
        return Err(PawsyncError::invalid_schedule(
            subscription_id,
            "dogs must be at least 1",
        ));
    }

    let overnight = schedule.crosses_midnight() || service_code.is_overnight();
    let mut occurrences = Vec::new();

    for offset in 0..horizon_days {
        let date = reference_date + Days::new(u64::from(offset));
        let weekday = date.weekday().num_days_from_monday() as u8;
        if !schedule.days.contains(&weekday) {
            continue;
        }

        let start = date.and_time(schedule.start_time);
        let end_date = if overnight { date + Days::new(1) } else { date };
        let end = end_date.and_time(schedule.end_time);

        occurrences.push(Occurrence {
            subscription_id: subscription_id.to_string(),
            client_id: client_id.to_string(),
            service_code,
            start,
            end,
            location: schedule.location.clone(),
            dogs: schedule.dogs,
            notes: schedule.notes.clone(),
            price_cents: schedule.price_cents.unwrap_or(0),
        });
    }

    Ok(occurrences)
}
