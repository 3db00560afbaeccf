//! Activity calendars, streaks and milestone projections for a daily
//! message feed.
//!
//! The computational routines ([`calendar::build_calendar`],
//! [`milestones::project_milestones`], [`streak::summarize_streak`],
//! [`history::group_history`]) are pure; [`run`] wires them to the CLI.

pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod event;
pub mod feed;
pub mod history;
pub mod milestones;
pub mod render;
pub mod streak;
pub mod timezone;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting streakline CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.streaklinerc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let settings =
    config::Settings::from_config(&cfg)
      .context(
        "invalid configuration"
      )?;

  let tz = timezone::resolve_timezone(
    cli
      .timezone
      .as_deref()
      .or(settings.timezone.as_deref())
  )
  .context(
    "failed to resolve timezone"
  )?;

  let mut renderer =
    render::Renderer::new(&cfg)?;

  commands::dispatch(
    cli.command,
    &settings,
    tz,
    &mut renderer
  )?;

  info!("done");
  Ok(())
}
