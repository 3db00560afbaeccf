use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::calendar::YearMonth;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "streakline",
    version,
    about = "Activity calendars, streaks and milestones from message exports"
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "streaklinerc", global = true)]
    pub streaklinerc: Option<PathBuf>,

    /// IANA timezone used for day boundaries.
    #[arg(long = "timezone", global = true)]
    pub timezone: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Render the activity heatmap for one month.
    Calendar(CalendarArgs),
    /// Show achieved and upcoming streak milestones.
    Milestones(MilestonesArgs),
    /// Derive the current and longest streak from an event export.
    Streak(FeedArgs),
    /// Group messages with their replies by date range.
    History(FeedArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FeedArgs {
    /// JSON array, envelope object or JSON lines; `-` for stdin.
    #[arg(long = "events", short = 'e')]
    pub events: PathBuf,

    /// Instant treated as now (e.g. `today`, `-1d`, `2024-05-20`).
    #[arg(long = "today")]
    pub today: Option<String>,

    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CalendarArgs {
    #[command(flatten)]
    pub feed: FeedArgs,

    /// Month to display as YYYY-MM; defaults to the month of `--today`.
    #[arg(long = "month", value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<YearMonth>()))]
    pub month: Option<YearMonth>,

    /// Streak length credited to the user; derived from events when absent.
    #[arg(long = "streak")]
    pub streak: Option<u32>,

    /// Last sent instant; derived from events when absent.
    #[arg(long = "last")]
    pub last: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct MilestonesArgs {
    #[arg(long = "streak")]
    pub streak: Option<u32>,

    #[arg(long = "last")]
    pub last: Option<String>,

    /// Derive streak and last sent instant from this export.
    #[arg(long = "events", short = 'e')]
    pub events: Option<PathBuf>,

    #[arg(long = "today")]
    pub today: Option<String>,

    #[arg(long = "json")]
    pub json: bool,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` tokens out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{Command, GlobalCli, preprocess_args};

    fn args(raw: &[&str]) -> Vec<OsString> {
        raw.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&[
            "streakline",
            "rc.timezone=Asia/Tokyo",
            "calendar",
            "rc.color:off",
            "--events",
            "feed.json",
        ]))
        .expect("preprocess");

        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.timezone".to_string(), "Asia/Tokyo".to_string()),
                ("rc.color".to_string(), "off".to_string()),
            ]
        );
        assert_eq!(pre.cleaned_args, args(&["streakline", "calendar", "--events", "feed.json"]));
    }

    #[test]
    fn parses_calendar_subcommand() {
        let cli = GlobalCli::try_parse_from(args(&[
            "streakline",
            "-vv",
            "--rc",
            "display.upcoming=2",
            "calendar",
            "--events",
            "feed.json",
            "--month",
            "2024-02",
            "--streak",
            "12",
            "--timezone",
            "UTC",
        ]))
        .expect("parse cli");

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.rc_overrides[0].key, "display.upcoming");
        assert_eq!(cli.timezone.as_deref(), Some("UTC"));
        let Command::Calendar(cal) = cli.command else {
            panic!("expected calendar command");
        };
        assert_eq!(cal.streak, Some(12));
        assert_eq!(cal.month.map(|m| m.to_string()).as_deref(), Some("2024-02"));
    }

    #[test]
    fn rejects_bad_month() {
        let parsed = GlobalCli::try_parse_from(args(&[
            "streakline",
            "calendar",
            "--events",
            "feed.json",
            "--month",
            "2024-13",
        ]));
        assert!(parsed.is_err());
    }
}
