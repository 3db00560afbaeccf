use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info};

use crate::calendar::{CalendarDay, YearMonth, build_calendar};
use crate::cli::{CalendarArgs, Command, FeedArgs, MilestonesArgs};
use crate::config::Settings;
use crate::event::{Event, latest_sent_at};
use crate::feed::load_events;
use crate::history::group_history;
use crate::milestones::{MilestoneState, project_milestones};
use crate::render::Renderer;
use crate::streak::summarize_streak;
use crate::timezone::{parse_date_expr, zoned_date};

#[derive(Debug, Serialize)]
struct CalendarReport<'a> {
    month: YearMonth,
    timezone: &'a str,
    streak: u32,
    last_event: Option<DateTime<Utc>>,
    days: &'a [CalendarDay],
}

#[derive(Debug, Serialize)]
struct MilestoneReport<'a> {
    #[serde(flatten)]
    state: &'a MilestoneState,
    progress_percent: f64,
    visible_achieved: &'a [u32],
    visible_upcoming: &'a [u32],
}

#[tracing::instrument(skip_all)]
pub fn dispatch(
    command: Command,
    settings: &Settings,
    tz: Tz,
    renderer: &mut Renderer,
) -> anyhow::Result<()> {
    let now = Utc::now();
    debug!(%now, tz = %tz, "dispatching command");

    match command {
        Command::Calendar(args) => cmd_calendar(args, settings, tz, now, renderer),
        Command::Milestones(args) => cmd_milestones(args, settings, tz, now, renderer),
        Command::Streak(args) => cmd_streak(args, tz, now, renderer),
        Command::History(args) => cmd_history(args, tz, now, renderer),
    }
}

fn reference_today(expr: Option<&str>, now: DateTime<Utc>, tz: Tz) -> anyhow::Result<DateTime<Utc>> {
    match expr {
        Some(raw) => parse_date_expr(raw, now, tz),
        None => Ok(now),
    }
}

fn resolve_last(
    expr: Option<&str>,
    now: DateTime<Utc>,
    tz: Tz,
    fallback: impl FnOnce() -> Option<DateTime<Utc>>,
) -> anyhow::Result<Option<DateTime<Utc>>> {
    match expr {
        Some(raw) => parse_date_expr(raw, now, tz).map(Some),
        None => Ok(fallback()),
    }
}

fn cmd_calendar(
    args: CalendarArgs,
    settings: &Settings,
    tz: Tz,
    now: DateTime<Utc>,
    renderer: &mut Renderer,
) -> anyhow::Result<()> {
    let events = load_events(&args.feed.events)?;
    let today = reference_today(args.feed.today.as_deref(), now, tz)?;
    let month = args
        .month
        .unwrap_or_else(|| YearMonth::containing(zoned_date(today, tz)));

    let streak = match args.streak {
        Some(streak) => streak,
        None => summarize_streak(&events, today, tz).current,
    };
    let last_event = resolve_last(args.last.as_deref(), now, tz, || latest_sent_at(&events))?;
    info!(%month, streak, ?last_event, "building calendar");

    let days = build_calendar(&events, today, streak, last_event, month, tz, &settings.decay);

    if args.feed.json {
        return renderer.print_json(&CalendarReport {
            month,
            timezone: tz.name(),
            streak,
            last_event,
            days: &days,
        });
    }
    renderer.print_calendar(month, &days)
}

fn cmd_milestones(
    args: MilestonesArgs,
    settings: &Settings,
    tz: Tz,
    now: DateTime<Utc>,
    renderer: &mut Renderer,
) -> anyhow::Result<()> {
    let today = reference_today(args.today.as_deref(), now, tz)?;
    let summary = match &args.events {
        Some(path) => Some(summarize_streak(&load_events(path)?, today, tz)),
        None => None,
    };

    let streak = args
        .streak
        .or_else(|| summary.as_ref().map(|s| s.current))
        .unwrap_or(0);
    let last_event = resolve_last(args.last.as_deref(), now, tz, || {
        summary.as_ref().and_then(|s| s.last_event)
    })?;

    let state = project_milestones(streak, last_event, tz, &settings.ladder);

    if args.json {
        return renderer.print_json(&MilestoneReport {
            state: &state,
            progress_percent: state.progress_percent(),
            visible_achieved: state.visible_achieved(&settings.window),
            visible_upcoming: state.visible_upcoming(&settings.window),
        });
    }
    renderer.print_milestones(&state, &settings.window)
}

fn load_feed(args: &FeedArgs, now: DateTime<Utc>, tz: Tz) -> anyhow::Result<(Vec<Event>, DateTime<Utc>)> {
    let events = load_events(&args.events)?;
    let today = reference_today(args.today.as_deref(), now, tz)?;
    Ok((events, today))
}

fn cmd_streak(args: FeedArgs, tz: Tz, now: DateTime<Utc>, renderer: &mut Renderer) -> anyhow::Result<()> {
    let (events, today) = load_feed(&args, now, tz)?;
    let summary = summarize_streak(&events, today, tz);
    if args.json {
        return renderer.print_json(&summary);
    }
    renderer.print_streak(&summary)
}

fn cmd_history(args: FeedArgs, tz: Tz, now: DateTime<Utc>, renderer: &mut Renderer) -> anyhow::Result<()> {
    let (events, today) = load_feed(&args, now, tz)?;
    let groups = group_history(&events, today, tz);
    if args.json {
        return renderer.print_json(&groups);
    }
    renderer.print_history(&groups)
}
