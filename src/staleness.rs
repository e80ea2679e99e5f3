// src/staleness.rs
use chrono::{NaiveDate, NaiveDateTime};

use crate::normalize::parse_published_date;

/// Result of resolving an item's raw publish date against the age limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleCheck {
    Fresh { published_on: NaiveDate, age_days: i64 },
    Stale { published_on: NaiveDate, age_days: i64 },
    /// Date could not be parsed; treated as fresh.
    Unparsable,
}

impl StaleCheck {
    pub fn is_stale(&self) -> bool {
        matches!(self, StaleCheck::Stale { .. })
    }
}

/// True iff `reference_now - published_at` is more than `max_age_days` whole
/// calendar days. Both sides are naive local dates; no timezone conversion.
/// `None` (unknown date) is never stale.
pub fn is_stale(published_at: Option<NaiveDate>, max_age_days: i64, reference_now: NaiveDate) -> bool {
    match published_at {
        Some(d) => age_in_days(d, reference_now) > max_age_days,
        None => false,
    }
}

/// Parse `raw` and classify it; anomalies are logged here so callers don't
/// each need their own handling.
pub fn check(raw: &str, max_age_days: i64, reference_now: NaiveDateTime) -> StaleCheck {
    let Some(published_on) = parse_published_date(raw, reference_now) else {
        tracing::error!(published_at = raw, "unparsable publish date, treating item as fresh");
        return StaleCheck::Unparsable;
    };
    let age_days = age_in_days(published_on, reference_now.date());
    if is_stale(Some(published_on), max_age_days, reference_now.date()) {
        StaleCheck::Stale { published_on, age_days }
    } else {
        StaleCheck::Fresh { published_on, age_days }
    }
}

fn age_in_days(published_on: NaiveDate, today: NaiveDate) -> i64 {
    today.signed_duration_since(published_on).num_days()
}
