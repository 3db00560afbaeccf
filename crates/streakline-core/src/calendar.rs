use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, trace};

use crate::event::Event;
use crate::timezone::zoned_date;

pub const MAX_INTENSITY: u8 = 4;

/// A validated `(year, month)` pair naming one calendar page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> anyhow::Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(anyhow!("month must be within 1..=12, got {month}"));
        }
        NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| anyhow!("year out of range: {year}"))?;
        Ok(Self { year, month })
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self, day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, day)
    }

    pub fn days_in_month(&self) -> u32 {
        (29..=31)
            .rev()
            .find(|day| self.day(*day).is_some())
            .unwrap_or(28)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| anyhow!("expected YYYY-MM, got: {s}"))?;
        let year: i32 = year
            .parse()
            .with_context(|| format!("invalid year in {s}"))?;
        let month: u32 = month
            .parse()
            .with_context(|| format!("invalid month in {s}"))?;
        Self::new(year, month)
    }
}

/// Fades streak-covered days without events by age.
///
/// `bands` are `(max_days_ago, level)` pairs checked in order; days older
/// than the last band get `floor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecayBands {
    bands: Vec<(i64, u8)>,
    floor: u8,
}

impl Default for DecayBands {
    fn default() -> Self {
        Self {
            bands: vec![(3, 4), (7, 3), (14, 2)],
            floor: 1,
        }
    }
}

impl DecayBands {
    pub fn new(mut bands: Vec<(i64, u8)>, floor: u8) -> anyhow::Result<Self> {
        if let Some((days, level)) = bands
            .iter()
            .find(|(days, level)| *days < 0 || *level > MAX_INTENSITY)
        {
            return Err(anyhow!(
                "invalid decay band {days}:{level}; days must be >= 0 and level <= {MAX_INTENSITY}"
            ));
        }
        if floor > MAX_INTENSITY {
            return Err(anyhow!("decay floor must be <= {MAX_INTENSITY}, got {floor}"));
        }
        bands.sort_by_key(|(days, _)| *days);
        Ok(Self { bands, floor })
    }

    pub fn level_for(&self, days_since: i64) -> u8 {
        self.bands
            .iter()
            .find(|(max_days, _)| days_since <= *max_days)
            .map(|(_, level)| *level)
            .unwrap_or(self.floor)
    }
}

/// One cell of the activity calendar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub day_number: u32,
    intensity: u8,
    pub is_today: bool,
    pub event_count: usize,
    pub events: Vec<Event>,
}

impl CalendarDay {
    pub fn intensity(&self) -> u8 {
        self.intensity
    }
}

/// Builds the activity grid for `month`, one entry per day in ascending
/// order.
///
/// Day boundaries come from `tz`. Days with events shade by count; empty
/// days inside the active streak window shade by `decay`, but only when
/// `last_event` is known.
#[tracing::instrument(
    skip_all,
    fields(events = events.len(), month = %month, tz = %tz, streak_count = streak_count)
)]
pub fn build_calendar(
    events: &[Event],
    reference_today: DateTime<Utc>,
    streak_count: u32,
    last_event: Option<DateTime<Utc>>,
    month: YearMonth,
    tz: Tz,
    decay: &DecayBands,
) -> Vec<CalendarDay> {
    let mut buckets: HashMap<NaiveDate, Vec<Event>> = HashMap::new();
    let mut skipped = 0usize;

    for event in events {
        let Some(sent_at) = event.sent_at() else {
            trace!(timestamp = %event.timestamp, "skipping event with unparseable timestamp");
            skipped += 1;
            continue;
        };
        buckets
            .entry(zoned_date(sent_at, tz))
            .or_default()
            .push(event.clone());
    }

    let today = zoned_date(reference_today, tz);
    let mut days = Vec::with_capacity(month.days_in_month() as usize);

    for day_number in 1..=month.days_in_month() {
        let Some(date) = month.day(day_number) else {
            continue;
        };
        let events = buckets.remove(&date).unwrap_or_default();
        let event_count = events.len();

        let intensity = if event_count > 0 {
            event_count.min(MAX_INTENSITY as usize) as u8
        } else if last_event.is_some() {
            let days_since = today.signed_duration_since(date).num_days();
            if days_since >= 0 && days_since < i64::from(streak_count) {
                decay.level_for(days_since)
            } else {
                0
            }
        } else {
            0
        };

        days.push(CalendarDay {
            date,
            day_number,
            intensity,
            is_today: date == today,
            event_count,
            events,
        });
    }

    debug!(
        days = days.len(),
        skipped,
        active = days.iter().filter(|d| d.intensity > 0).count(),
        "built activity calendar"
    );
    days
}
