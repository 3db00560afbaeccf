use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::debug;

use crate::timezone::zoned_date;

pub const DEFAULT_MILESTONES: [u32; 7] = [7, 14, 30, 50, 100, 200, 365];

/// Ascending streak thresholds worth celebrating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestoneLadder {
    thresholds: Vec<u32>,
}

impl Default for MilestoneLadder {
    fn default() -> Self {
        Self {
            thresholds: DEFAULT_MILESTONES.to_vec(),
        }
    }
}

impl MilestoneLadder {
    /// Sorts and deduplicates; zero is not a milestone.
    pub fn new(mut thresholds: Vec<u32>) -> Self {
        thresholds.retain(|t| *t > 0);
        thresholds.sort_unstable();
        thresholds.dedup();
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &[u32] {
        &self.thresholds
    }
}

/// How many milestones a progress card shows on each side of the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayWindow {
    pub upcoming: usize,
    pub achieved: usize,
}

impl Default for DisplayWindow {
    fn default() -> Self {
        Self {
            upcoming: 5,
            achieved: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneState {
    pub current_streak: u32,
    pub achieved: Vec<u32>,
    pub upcoming: Vec<u32>,
    pub next_milestone: Option<u32>,
    pub days_until_next: Option<u32>,
    pub projected_date: Option<NaiveDate>,
    pub all_achieved: bool,
}

impl MilestoneState {
    /// The last `window.achieved` milestones reached.
    pub fn visible_achieved(&self, window: &DisplayWindow) -> &[u32] {
        let skip = self.achieved.len().saturating_sub(window.achieved);
        &self.achieved[skip..]
    }

    /// The next `window.upcoming` milestones.
    pub fn visible_upcoming(&self, window: &DisplayWindow) -> &[u32] {
        let take = self.upcoming.len().min(window.upcoming);
        &self.upcoming[..take]
    }

    /// Progress from the previous milestone (or zero) toward the next one.
    pub fn progress_percent(&self) -> f64 {
        let Some(next) = self.next_milestone else {
            return 100.0;
        };
        let base = self.achieved.last().copied().unwrap_or(0);
        let span = next.saturating_sub(base);
        if span == 0 {
            return 100.0;
        }
        let done = self.current_streak.saturating_sub(base);
        f64::from(done) / f64::from(span) * 100.0
    }
}

/// Splits the ladder at `current_streak` and projects when the next
/// milestone lands.
///
/// The projection is calendar arithmetic on the zoned date of
/// `last_event`, so DST shifts never move it.
#[tracing::instrument(skip(ladder, tz), fields(tz = %tz))]
pub fn project_milestones(
    current_streak: u32,
    last_event: Option<DateTime<Utc>>,
    tz: Tz,
    ladder: &MilestoneLadder,
) -> MilestoneState {
    let (achieved, upcoming): (Vec<u32>, Vec<u32>) = ladder
        .thresholds()
        .iter()
        .partition(|threshold| **threshold <= current_streak);

    let next_milestone = upcoming.first().copied();
    let days_until_next = next_milestone.map(|next| next - current_streak);

    let projected_date = match (days_until_next, last_event) {
        (Some(days), Some(last)) => {
            zoned_date(last, tz).checked_add_days(Days::new(u64::from(days)))
        }
        _ => None,
    };

    let all_achieved = upcoming.is_empty();
    debug!(
        achieved = achieved.len(),
        upcoming = upcoming.len(),
        ?next_milestone,
        ?projected_date,
        "projected milestones"
    );

    MilestoneState {
        current_streak,
        achieved,
        upcoming,
        next_milestone,
        days_until_next,
        projected_date,
        all_achieved,
    }
}
