use chrono::{NaiveDate, TimeZone, Utc};
use streakline_core::calendar::{YearMonth, build_calendar};
use streakline_core::config::{Config, Settings};
use streakline_core::feed::load_events;
use streakline_core::history::{HistoryBucket, group_history};
use streakline_core::milestones::project_milestones;
use streakline_core::streak::summarize_streak;
use streakline_core::timezone::resolve_timezone;
use tempfile::tempdir;

const FEED: &str = r#"{
  "messages": [
    {"id": 1, "sent_at": "2024-03-01T12:00:00Z", "message": "Day one."},
    {"id": 2, "sent_at": "2024-03-02T12:00:00Z", "message": "Keep it up."},
    {"id": 3, "sent_at": "2024-03-03T02:00:00Z", "message": "Thanks!", "reply_to": 2},
    {"id": 4, "sent_at": "2024-03-03T12:00:00Z", "message": "Three in a row."},
    {"id": 5, "sent_at": "2024-03-04T12:00:00Z", "message": "Momentum."},
    {"id": 6, "sent_at": "not-a-date", "message": "lost in transit"},
    {"id": 7, "sent_at": 1709640000000, "message": "Five days strong."}
  ]
}"#;

#[test]
fn feed_to_calendar_and_milestones() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("feed.json");
    std::fs::write(&path, FEED).expect("write feed");

    let events = load_events(&path).expect("load feed");
    assert_eq!(events.len(), 7);

    let settings = Settings::from_config(&Config::defaults()).expect("settings");
    let tz = resolve_timezone(Some("America/New_York")).expect("timezone");
    let today = Utc
        .with_ymd_and_hms(2024, 3, 6, 15, 0, 0)
        .single()
        .expect("today");

    // The 02:00 UTC reply on March 3 is still the evening of March 2 in
    // New York.
    let summary = summarize_streak(&events, today, tz);
    assert_eq!(summary.current, 5);
    assert_eq!(summary.active_days, 5);

    let month = YearMonth::new(2024, 3).expect("month");
    let days = build_calendar(
        &events,
        today,
        summary.current,
        summary.last_event,
        month,
        tz,
        &settings.decay,
    );
    assert_eq!(days.len(), 31);
    assert_eq!(days.iter().filter(|d| d.is_today).count(), 1);
    assert!(days[5].is_today);
    assert_eq!(days[1].event_count, 2);
    assert_eq!(days[1].intensity(), 2);
    assert_eq!(days[2].intensity(), 1);
    assert_eq!(days.iter().map(|d| d.event_count).sum::<usize>(), 6);
    assert_eq!(days[5].event_count, 0);
    assert_eq!(days[5].intensity(), 4);
    assert!(days[6..].iter().all(|d| d.intensity() == 0));

    let state = project_milestones(summary.current, summary.last_event, tz, &settings.ladder);
    assert!(state.achieved.is_empty());
    assert_eq!(state.next_milestone, Some(7));
    assert_eq!(state.days_until_next, Some(2));
    assert_eq!(state.projected_date, NaiveDate::from_ymd_opt(2024, 3, 7));

    let groups = group_history(&events, today, tz);
    let buckets: Vec<_> = groups.iter().map(|g| g.bucket).collect();
    assert_eq!(buckets, vec![HistoryBucket::Yesterday, HistoryBucket::ThisWeek]);
    let threaded = groups
        .iter()
        .flat_map(|g| g.threads.iter())
        .find(|t| !t.replies.is_empty())
        .expect("threaded message");
    assert_eq!(threaded.root.id().as_deref(), Some("2"));
    assert_eq!(threaded.replies[0].id().as_deref(), Some("3"));
}
