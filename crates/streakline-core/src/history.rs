use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, trace};

use crate::event::Event;
use crate::timezone::zoned_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryBucket {
    Today,
    Yesterday,
    ThisWeek,
    ThisMonth,
    Older,
}

impl HistoryBucket {
    pub const ALL: [HistoryBucket; 5] = [
        HistoryBucket::Today,
        HistoryBucket::Yesterday,
        HistoryBucket::ThisWeek,
        HistoryBucket::ThisMonth,
        HistoryBucket::Older,
    ];

    /// Future-dated messages count as today.
    pub fn for_days_ago(days_ago: i64) -> Self {
        match days_ago {
            i64::MIN..=0 => Self::Today,
            1 => Self::Yesterday,
            2..=6 => Self::ThisWeek,
            7..=29 => Self::ThisMonth,
            _ => Self::Older,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Today => "Today",
            Self::Yesterday => "Yesterday",
            Self::ThisWeek => "This week",
            Self::ThisMonth => "This month",
            Self::Older => "Older",
        }
    }
}

impl fmt::Display for HistoryBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A message and the replies hanging off it, oldest reply first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thread {
    pub sent_at: DateTime<Utc>,
    pub root: Event,
    pub replies: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryGroup {
    pub bucket: HistoryBucket,
    pub threads: Vec<Thread>,
}

/// Threads messages with their replies and files each thread under a date
/// range relative to `reference_today`.
///
/// Groups come back Today first with empty ones left out; threads inside a
/// group are newest first.
#[tracing::instrument(skip_all, fields(events = events.len(), tz = %tz))]
pub fn group_history(events: &[Event], reference_today: DateTime<Utc>, tz: Tz) -> Vec<HistoryGroup> {
    let dated: Vec<(DateTime<Utc>, &Event)> = events
        .iter()
        .filter_map(|event| match event.sent_at() {
            Some(at) => Some((at, event)),
            None => {
                trace!(timestamp = %event.timestamp, "skipping history entry with unparseable timestamp");
                None
            }
        })
        .collect();

    let index_by_id: HashMap<String, usize> = dated
        .iter()
        .enumerate()
        .filter_map(|(idx, (_, event))| event.id().map(|id| (id, idx)))
        .collect();

    let parent_of = |idx: usize| -> Option<usize> {
        let parent = dated[idx].1.reply_to()?;
        index_by_id.get(&parent).copied().filter(|p| *p != idx)
    };

    // A chain that loops back on itself leaves the message as its own root.
    let root_of = |idx: usize| -> usize {
        let mut seen = HashSet::from([idx]);
        let mut current = idx;
        while let Some(parent) = parent_of(current) {
            if !seen.insert(parent) {
                return idx;
            }
            current = parent;
        }
        current
    };

    let mut roots: Vec<usize> = Vec::new();
    let mut replies: HashMap<usize, Vec<usize>> = HashMap::new();
    for idx in 0..dated.len() {
        let root = if parent_of(idx).is_some() { root_of(idx) } else { idx };
        if root == idx {
            roots.push(idx);
        } else {
            replies.entry(root).or_default().push(idx);
        }
    }

    let today = zoned_date(reference_today, tz);
    let mut groups: Vec<HistoryGroup> = HistoryBucket::ALL
        .iter()
        .map(|bucket| HistoryGroup {
            bucket: *bucket,
            threads: Vec::new(),
        })
        .collect();

    for root in roots {
        let (sent_at, event) = dated[root];
        let mut thread_replies = replies.remove(&root).unwrap_or_default();
        thread_replies.sort_by_key(|idx| dated[*idx].0);

        let days_ago = today.signed_duration_since(zoned_date(sent_at, tz)).num_days();
        let bucket = HistoryBucket::for_days_ago(days_ago);
        let slot = HistoryBucket::ALL
            .iter()
            .position(|b| *b == bucket)
            .unwrap_or(HistoryBucket::ALL.len() - 1);

        groups[slot].threads.push(Thread {
            sent_at,
            root: event.clone(),
            replies: thread_replies
                .into_iter()
                .map(|idx| dated[idx].1.clone())
                .collect(),
        });
    }

    for group in &mut groups {
        group.threads.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
    }
    groups.retain(|group| !group.threads.is_empty());

    debug!(
        groups = groups.len(),
        threads = groups.iter().map(|g| g.threads.len()).sum::<usize>(),
        "grouped message history"
    );
    groups
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::{HistoryBucket, group_history};
    use crate::event::Event;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 20, 12, 0, 0)
            .single()
            .expect("valid now")
    }

    fn msg(id: &str, at: &str) -> Event {
        Event::new(at).with_field("id", id)
    }

    #[test]
    fn buckets_by_age() {
        assert_eq!(HistoryBucket::for_days_ago(-2), HistoryBucket::Today);
        assert_eq!(HistoryBucket::for_days_ago(0), HistoryBucket::Today);
        assert_eq!(HistoryBucket::for_days_ago(1), HistoryBucket::Yesterday);
        assert_eq!(HistoryBucket::for_days_ago(6), HistoryBucket::ThisWeek);
        assert_eq!(HistoryBucket::for_days_ago(7), HistoryBucket::ThisMonth);
        assert_eq!(HistoryBucket::for_days_ago(29), HistoryBucket::ThisMonth);
        assert_eq!(HistoryBucket::for_days_ago(30), HistoryBucket::Older);
    }

    #[test]
    fn replies_attach_to_their_root() {
        let events = vec![
            msg("a", "2024-04-20T08:00:00Z"),
            msg("c", "2024-04-20T10:00:00Z").with_field("reply_to", "b"),
            msg("b", "2024-04-20T09:00:00Z").with_field("reply_to", "a"),
            msg("d", "2024-04-19T08:00:00Z"),
        ];
        let groups = group_history(&events, now(), chrono_tz::UTC);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].bucket, HistoryBucket::Today);
        let thread = &groups[0].threads[0];
        assert_eq!(thread.root.id().as_deref(), Some("a"));
        let reply_ids: Vec<_> = thread.replies.iter().filter_map(Event::id).collect();
        assert_eq!(reply_ids, vec!["b".to_string(), "c".to_string()]);

        assert_eq!(groups[1].bucket, HistoryBucket::Yesterday);
        assert_eq!(groups[1].threads[0].root.id().as_deref(), Some("d"));
    }

    #[test]
    fn orphan_replies_become_roots() {
        let events = vec![msg("x", "2024-04-18T08:00:00Z").with_field("reply_to", "missing")];
        let groups = group_history(&events, now(), chrono_tz::UTC);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].bucket, HistoryBucket::ThisWeek);
        assert!(groups[0].threads[0].replies.is_empty());
    }

    #[test]
    fn threads_sorted_newest_first_and_junk_dropped() {
        let events = vec![
            msg("old", "2024-02-01T08:00:00Z"),
            msg("older", "2024-01-01T08:00:00Z"),
            msg("bad", "sometime"),
            msg("week", "2024-04-15T08:00:00Z"),
        ];
        let groups = group_history(&events, now(), chrono_tz::UTC);
        let buckets: Vec<_> = groups.iter().map(|g| g.bucket).collect();
        assert_eq!(buckets, vec![HistoryBucket::ThisWeek, HistoryBucket::Older]);

        let older_ids: Vec<_> = groups[1].threads.iter().filter_map(|t| t.root.id()).collect();
        assert_eq!(older_ids, vec!["old".to_string(), "older".to_string()]);
    }

    #[test]
    fn reply_cycle_terminates() {
        let events = vec![
            msg("p", "2024-04-20T08:00:00Z").with_field("reply_to", "q"),
            msg("q", "2024-04-20T09:00:00Z").with_field("reply_to", "p"),
        ];
        let groups = group_history(&events, now(), chrono_tz::UTC);
        let total: usize = groups.iter().map(|g| g.threads.len()).sum();
        assert_eq!(total, 2);
    }
}
