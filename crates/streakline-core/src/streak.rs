//! Streak derivation from raw events.
//!
//! Used when the caller has an event export but no server-side streak count.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::debug;

use crate::event::Event;
use crate::timezone::zoned_date;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreakSummary {
    /// Run of consecutive days ending today or yesterday.
    pub current: u32,
    pub longest: u32,
    pub active_days: u32,
    pub last_event: Option<DateTime<Utc>>,
}

#[tracing::instrument(skip_all, fields(events = events.len(), tz = %tz))]
pub fn summarize_streak(events: &[Event], reference_today: DateTime<Utc>, tz: Tz) -> StreakSummary {
    let instants: Vec<DateTime<Utc>> = events.iter().filter_map(Event::sent_at).collect();
    let last_event = instants.iter().max().copied();

    let mut days: Vec<NaiveDate> = instants.iter().map(|dt| zoned_date(*dt, tz)).collect();
    days.sort_unstable();
    days.dedup();

    if days.is_empty() {
        return StreakSummary::default();
    }

    let mut longest = 1u32;
    let mut run = 1u32;
    for pair in days.windows(2) {
        if pair[1].signed_duration_since(pair[0]).num_days() == 1 {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 1;
        }
    }

    let today = zoned_date(reference_today, tz);
    let past: Vec<NaiveDate> = days.iter().copied().filter(|d| *d <= today).collect();
    let current = match past.last() {
        Some(last) if today.signed_duration_since(*last).num_days() <= 1 => {
            let mut count = 1u32;
            for pair in past.windows(2).rev() {
                if pair[1].signed_duration_since(pair[0]).num_days() == 1 {
                    count += 1;
                } else {
                    break;
                }
            }
            count
        }
        _ => 0,
    };

    debug!(current, longest, active_days = days.len(), "summarized streak");

    StreakSummary {
        current,
        longest,
        active_days: days.len() as u32,
        last_event,
    }
}
