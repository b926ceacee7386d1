use std::collections::{BTreeSet, HashMap};

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{PawsyncError, Result};

/// A canonical recurring schedule for one subscription.
///
/// Built from the billing provider's free-form subscription metadata via
/// [`ScheduleSpec::from_metadata`], which validates rather than defaulting.
/// Days are kept sorted Monday-first so occurrence generation is
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Weekdays the service runs on. Never empty.
    pub days: BTreeSet<u8>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub location: String,
    /// Number of dogs. Always >= 1.
    pub dogs: u32,
    pub notes: String,
    /// Per-visit face price, when the subscription metadata carries one.
    pub price_cents: Option<i64>,
}

impl ScheduleSpec {
    /// Parse a schedule from provider metadata.
    ///
    /// Keys may be prefixed (`schedule_days`) or bare (`days`); the prefixed
    /// form wins when both are present. Days are a comma-separated list of
    /// three-letter names (`MON,WED,FRI`), times are `HH:MM`. Missing or
    /// malformed required fields are an `InvalidSchedule` error, never a
    /// silent default.
    pub fn from_metadata(
        subscription_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<Self> {
        let get = |prefixed: &str, bare: &str| -> Option<&str> {
            metadata
                .get(prefixed)
                .or_else(|| metadata.get(bare))
                .map(|s| s.as_str())
        };

        let days_raw = get("schedule_days", "days")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                PawsyncError::invalid_schedule(subscription_id, "days metadata is missing")
            })?;
        let mut days = BTreeSet::new();
        for part in days_raw.split(',') {
            let name = part.trim();
            if name.is_empty() {
                continue;
            }
            days.insert(parse_day(subscription_id, name)?);
        }
        if days.is_empty() {
            return Err(PawsyncError::invalid_schedule(
                subscription_id,
                "days list is empty",
            ));
        }

        let start_time = parse_time(
            subscription_id,
            "start_time",
            get("schedule_start_time", "start_time"),
        )?;
        let end_time = parse_time(
            subscription_id,
            "end_time",
            get("schedule_end_time", "end_time"),
        )?;

        let dogs_raw = get("schedule_dogs", "dogs")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                PawsyncError::invalid_schedule(subscription_id, "dogs metadata is missing")
            })?;
        let dogs: u32 = dogs_raw.parse().map_err(|_| {
            PawsyncError::invalid_schedule(
                subscription_id,
                format!("dogs is not a number: '{}'", dogs_raw),
            )
        })?;
        if dogs < 1 {
            return Err(PawsyncError::invalid_schedule(
                subscription_id,
                "dogs must be at least 1",
            ));
        }

        let price_cents = match get("schedule_price_cents", "price_cents").map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(raw.parse::<i64>().map_err(|_| {
                PawsyncError::invalid_schedule(
                    subscription_id,
                    format!("price_cents is not a number: '{}'", raw),
                )
            })?),
            _ => None,
        };
        if matches!(price_cents, Some(p) if p < 0) {
            return Err(PawsyncError::invalid_schedule(
                subscription_id,
                "price_cents must be non-negative",
            ));
        }

        Ok(Self {
            days,
            start_time,
            end_time,
            location: get("schedule_location", "location")
                .unwrap_or_default()
                .trim()
                .to_string(),
            dogs,
            notes: get("schedule_notes", "notes")
                .unwrap_or_default()
                .trim()
                .to_string(),
            price_cents,
        })
    }

    /// The weekdays as chrono values, sorted Monday-first.
    pub fn weekdays(&self) -> impl Iterator<Item = Weekday> + '_ {
        self.days.iter().map(|d| match d {
            0 => Weekday::Mon,
            1 => Weekday::Tue,
            2 => Weekday::Wed,
            3 => Weekday::Thu,
            4 => Weekday::Fri,
            5 => Weekday::Sat,
            _ => Weekday::Sun,
        })
    }

    /// True when the time window wraps past midnight.
    pub fn crosses_midnight(&self) -> bool {
        self.end_time <= self.start_time
    }
}

fn parse_day(subscription_id: &str, name: &str) -> Result<u8> {
    // Mon=0 .. Sun=6, matching chrono's num_days_from_monday
    match name.to_ascii_uppercase().as_str() {
        "MON" => Ok(0),
        "TUE" => Ok(1),
        "WED" => Ok(2),
        "THU" => Ok(3),
        "FRI" => Ok(4),
        "SAT" => Ok(5),
        "SUN" => Ok(6),
        other => Err(PawsyncError::invalid_schedule(
            subscription_id,
            format!("unrecognized day name: '{}'", other),
        )),
    }
}

fn parse_time(subscription_id: &str, field: &str, raw: Option<&str>) -> Result<NaiveTime> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or_else(|| {
        PawsyncError::invalid_schedule(subscription_id, format!("{} metadata is missing", field))
    })?;
    NaiveTime::parse_from_str(raw, "%H:%M").map_err(|_| {
        PawsyncError::invalid_schedule(
            subscription_id,
            format!("{} is not HH:MM: '{}'", field, raw),
        )
    })
}
