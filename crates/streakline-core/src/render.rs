use std::io::{self, IsTerminal, Write};

use anyhow::Context;
use chrono::{Datelike, Month};
use serde::Serialize;
use unicode_width::UnicodeWidthStr;

use crate::calendar::{CalendarDay, YearMonth};
use crate::config::Config;
use crate::event::Event;
use crate::history::HistoryGroup;
use crate::milestones::{DisplayWindow, MilestoneState};
use crate::streak::StreakSummary;

const WEEKDAY_HEADER: [&str; 7] = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];
const LEVEL_GLYPHS: [&str; 5] = ["·", "░", "▒", "▓", "█"];
const LEVEL_COLORS: [&str; 5] = ["90", "38;5;151", "38;5;114", "38;5;71", "38;5;28"];
const PREVIEW_KEYS: [&str; 4] = ["message", "text", "subject", "content"];
const PREVIEW_CHARS: usize = 48;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg
            .get_bool("color")
            .context("invalid color setting")?
            .unwrap_or(true);

        Ok(Self { color })
    }

    pub fn print_json<T: Serialize>(&mut self, value: &T) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        serde_json::to_writer_pretty(&mut out, value)?;
        writeln!(out)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, days), fields(month = %month))]
    pub fn print_calendar(&mut self, month: YearMonth, days: &[CalendarDay]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_calendar(&mut out, month, days)?;

        let active: Vec<&CalendarDay> = days.iter().filter(|d| d.event_count > 0).collect();
        if active.is_empty() {
            return Ok(());
        }
        writeln!(out)?;

        let headers = vec![
            "Date".to_string(),
            "Sent".to_string(),
            "Level".to_string(),
            "First message".to_string(),
        ];
        let rows = active
            .iter()
            .map(|day| {
                vec![
                    day.date.format("%Y-%m-%d").to_string(),
                    day.event_count.to_string(),
                    self.paint_level(&day.intensity().to_string(), day.intensity()),
                    day.events.first().map(preview).unwrap_or_default(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    fn write_calendar<W: Write>(&self, mut out: W, month: YearMonth, days: &[CalendarDay]) -> anyhow::Result<()> {
        let title = Month::try_from(month.month() as u8)
            .map(|m| format!("{} {}", m.name(), month.year()))
            .unwrap_or_else(|_| month.to_string());
        writeln!(out, "{title}")?;
        writeln!(out, "{}", WEEKDAY_HEADER.map(|d| format!("{d} ")).join(" "))?;

        let lead = days
            .first()
            .map_or(0, |day| day.date.weekday().num_days_from_monday() as usize);
        let mut cells: Vec<String> = vec!["   ".to_string(); lead];
        for day in days {
            let level = usize::from(day.intensity()).min(LEVEL_GLYPHS.len() - 1);
            let text = format!("{:>2}{}", day.day_number, LEVEL_GLYPHS[level]);
            let text = self.paint_level(&text, day.intensity());
            cells.push(if day.is_today { self.paint(&text, "1;4") } else { text });
        }

        for week in cells.chunks(7) {
            writeln!(out, "{}", week.join(" "))?;
        }

        let legend: Vec<String> = LEVEL_GLYPHS
            .iter()
            .enumerate()
            .map(|(level, glyph)| self.paint_level(&format!("{glyph} {level}"), level as u8))
            .collect();
        writeln!(out, "{}", legend.join("  "))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, state, window))]
    pub fn print_milestones(&mut self, state: &MilestoneState, window: &DisplayWindow) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_milestones(&mut out, state, window)
    }

    fn write_milestones<W: Write>(
        &self,
        mut out: W,
        state: &MilestoneState,
        window: &DisplayWindow,
    ) -> anyhow::Result<()> {
        writeln!(out, "streak    {} days", state.current_streak)?;

        let achieved = state.visible_achieved(window);
        if !achieved.is_empty() {
            let badges: Vec<String> = achieved.iter().map(|m| self.paint(&format!("✓ {m}"), "32")).collect();
            writeln!(out, "achieved  {}", badges.join("  "))?;
        }

        if state.all_achieved {
            writeln!(out, "{}", self.paint("every milestone reached", "33"))?;
            return Ok(());
        }

        if let (Some(next), Some(days)) = (state.next_milestone, state.days_until_next) {
            writeln!(
                out,
                "next      {next} days ({days} to go, {:.0}%)",
                state.progress_percent()
            )?;
        }
        if let Some(date) = state.projected_date {
            writeln!(out, "projected {}", date.format("%Y-%m-%d"))?;
        }

        let upcoming = state.visible_upcoming(window);
        if !upcoming.is_empty() {
            let list: Vec<String> = upcoming.iter().map(u32::to_string).collect();
            writeln!(out, "upcoming  {}", list.join(", "))?;
        }
        Ok(())
    }

    pub fn print_streak(&mut self, summary: &StreakSummary) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "current   {} days", summary.current)?;
        writeln!(out, "longest   {} days", summary.longest)?;
        writeln!(out, "active    {} days", summary.active_days)?;
        if let Some(last) = summary.last_event {
            writeln!(out, "last sent {}", last.format("%Y-%m-%dT%H:%M:%SZ"))?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, groups))]
    pub fn print_history(&mut self, groups: &[HistoryGroup]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        for group in groups {
            writeln!(out, "{}", self.paint(group.bucket.label(), "1"))?;
            for thread in &group.threads {
                writeln!(
                    out,
                    "  {}  {}",
                    thread.sent_at.format("%Y-%m-%d %H:%M"),
                    preview(&thread.root)
                )?;
                for reply in &thread.replies {
                    let at = reply
                        .sent_at()
                        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default();
                    writeln!(out, "    ↳ {}  {}", at, preview(reply))?;
                }
            }
        }
        Ok(())
    }

    fn paint_level(&self, text: &str, level: u8) -> String {
        let idx = usize::from(level).min(LEVEL_COLORS.len() - 1);
        self.paint(text, LEVEL_COLORS[idx])
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn preview(event: &Event) -> String {
    let text = PREVIEW_KEYS
        .iter()
        .find_map(|key| event.payload.get(*key).and_then(|v| v.as_str()))
        .unwrap_or_default();
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PREVIEW_CHARS {
        let cut: String = flat.chars().take(PREVIEW_CHARS - 1).collect();
        format!("{cut}…")
    } else {
        flat
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
