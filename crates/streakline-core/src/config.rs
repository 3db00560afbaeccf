use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::calendar::DecayBands;
use crate::milestones::{
  DisplayWindow,
  MilestoneLadder
};

const RC_ENV_VAR: &str = "STREAKLINERC";
const RC_FILE_NAME: &str = ".streaklinerc";

#[derive(Debug, Clone)]
pub struct Config {
  map:              HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::defaults();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading streaklinerc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no streaklinerc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  pub fn defaults() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("milestones", "7,14,30,50,100,200,365"),
      ("decay.bands", "3:4,7:3,14:2"),
      ("decay.floor", "1"),
      ("display.upcoming", "5"),
      ("display.achieved", "3"),
      ("color", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }
    Config {
      map,
      loaded_files: vec![]
    }
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    self
      .map
      .get(key)
      .map(|raw| {
        parse_bool(raw).ok_or_else(|| {
          anyhow!(
            "config key {key} expects \
             on/off, got `{raw}`"
          )
        })
      })
      .transpose()
  }

  fn get_usize(
    &self,
    key: &str
  ) -> anyhow::Result<Option<usize>> {
    self
      .get(key)
      .map(|raw| {
        raw.trim().parse::<usize>().with_context(|| {
          format!(
            "config key {key} expects \
             a non-negative integer, \
             got `{raw}`"
          )
        })
      })
      .transpose()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if self
          .loaded_files
          .contains(&include_path)
        {
          warn!(include = %include_path.display(), "include already loaded; skipping");
        } else if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

/// Typed view over [`Config`] for the
/// calendar and milestone routines.
#[derive(Debug, Clone)]
pub struct Settings {
  pub timezone: Option<String>,
  pub ladder:   MilestoneLadder,
  pub decay:    DecayBands,
  pub window:   DisplayWindow
}

impl Settings {
  #[tracing::instrument(skip_all)]
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let timezone = cfg
      .get("timezone")
      .map(|tz| tz.trim().to_string())
      .filter(|tz| !tz.is_empty());

    let ladder = match cfg
      .get("milestones")
    {
      | Some(raw) => {
        MilestoneLadder::new(
          parse_milestones(&raw)?
        )
      }
      | None => {
        MilestoneLadder::default()
      }
    };

    let decay = match cfg
      .get("decay.bands")
    {
      | Some(raw) => {
        let floor = cfg
          .get("decay.floor")
          .map(|f| {
            f.trim().parse::<u8>().with_context(|| {
              format!(
                "config key decay.floor \
                 expects 0-4, got `{f}`"
              )
            })
          })
          .transpose()?
          .unwrap_or(1);
        DecayBands::new(
          parse_decay_bands(&raw)?,
          floor
        )
        .context(
          "invalid decay.bands"
        )?
      }
      | None => DecayBands::default()
    };

    let defaults =
      DisplayWindow::default();
    let window = DisplayWindow {
      upcoming: cfg
        .get_usize("display.upcoming")?
        .unwrap_or(defaults.upcoming),
      achieved: cfg
        .get_usize("display.achieved")?
        .unwrap_or(defaults.achieved)
    };

    debug!(
      ?timezone,
      milestones = ?ladder.thresholds(),
      ?window,
      "resolved settings"
    );

    Ok(Self {
      timezone,
      ladder,
      decay,
      window
    })
  }
}

fn parse_milestones(
  raw: &str
) -> anyhow::Result<Vec<u32>> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|token| !token.is_empty())
    .map(|token| {
      token.parse::<u32>().with_context(
        || {
          format!(
            "invalid milestone \
             `{token}` in \
             milestones"
          )
        }
      )
    })
    .collect()
}

fn parse_decay_bands(
  raw: &str
) -> anyhow::Result<Vec<(i64, u8)>> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|token| !token.is_empty())
    .map(|token| {
      let (days, level) = token
        .split_once(':')
        .ok_or_else(|| {
          anyhow!(
            "decay band `{token}` \
             must look like \
             DAYS:LEVEL"
          )
        })?;
      let days =
        days.trim().parse::<i64>().with_context(|| {
          format!(
            "invalid days in decay \
             band `{token}`"
          )
        })?;
      let level =
        level.trim().parse::<u8>().with_context(|| {
          format!(
            "invalid level in decay \
             band `{token}`"
          )
        })?;
      Ok((days, level))
    })
    .collect()
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping \
       streaklinerc"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> Option<bool> {
  match s
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "1" | "y" | "yes" | "on"
    | "true" => Some(true),
    | "0" | "n" | "no" | "off"
    | "false" => Some(false),
    | _ => None
  }
}
