use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

const TIMEZONE_CONFIG_FILE: &str =
  "streakline-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "STREAKLINE_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "STREAKLINE_TIME_CONFIG";
const HOST_TIMEZONE_ENV_VAR: &str =
  "TZ";

const COMPACT_UTC_FORMAT: &str =
  "%Y%m%dT%H%M%SZ";
const NAIVE_TIMESTAMP_FORMATS:
  [&str; 4] = [
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%d %H:%M:%S%.f",
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%d %H:%M"
];

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Resolves the timezone used for day
/// boundaries.
///
/// An explicit id must parse. Ambient
/// sources (env, time config file, host
/// `TZ`) are tried in order and skipped
/// when broken; UTC is the last resort.
#[tracing::instrument]
pub fn resolve_timezone(
  explicit: Option<&str>
) -> anyhow::Result<Tz> {
  if let Some(raw) = explicit {
    return raw
      .trim()
      .parse::<Tz>()
      .map_err(|err| {
        anyhow!(
          "invalid timezone id \
           `{raw}`: {err}"
        )
      });
  }

  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return Ok(tz);
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return Ok(tz);
  }

  if let Ok(raw) = std::env::var(
    HOST_TIMEZONE_ENV_VAR
  ) && let Some(tz) = parse_timezone(
    raw.trim_start_matches(':'),
    HOST_TIMEZONE_ENV_VAR
  ) {
    return Ok(tz);
  }

  tracing::warn!(
    "no timezone configured; using \
     UTC"
  );
  Ok(chrono_tz::UTC)
}

#[must_use]
pub fn zoned_date(
  dt: DateTime<Utc>,
  tz: Tz
) -> NaiveDate {
  dt.with_timezone(&tz).date_naive()
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

pub(crate) fn load_timezone_from_file(
  path: &Path
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "resolved timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Instants and local datetimes are
/// accepted within `-9999..=9999`.
const MAX_ABS_YEAR: i32 = 9999;

fn within_supported_range(
  dt: DateTime<Utc>
) -> Option<DateTime<Utc>> {
  (dt.year().abs() <= MAX_ABS_YEAR)
    .then_some(dt)
}

/// Parses an event timestamp as it
/// arrives in JSON.
///
/// Strings may be RFC 3339, naive ISO
/// (read as UTC), compact
/// `YYYYMMDDTHHMMSSZ` or a bare date.
/// Numbers are epoch milliseconds.
/// Instants beyond year 9999 either
/// way are rejected.
#[must_use]
pub fn parse_timestamp(
  raw: &Value
) -> Option<DateTime<Utc>> {
  parse_timestamp_value(raw)
    .and_then(within_supported_range)
}

fn parse_timestamp_value(
  raw: &Value
) -> Option<DateTime<Utc>> {
  match raw {
    | Value::String(text) => {
      parse_timestamp_str(text)
    }
    | Value::Number(num) => {
      let millis =
        if let Some(ms) = num.as_i64() {
          ms
        } else {
          let ms = num.as_f64()?;
          if !ms.is_finite()
            || ms.abs() > i64::MAX as f64
          {
            return None;
          }
          ms.trunc() as i64
        };
      DateTime::from_timestamp_millis(
        millis
      )
    }
    | _ => None
  }
}

fn parse_timestamp_str(
  text: &str
) -> Option<DateTime<Utc>> {
  let token = text.trim();
  if token.is_empty() {
    return None;
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Some(dt.with_timezone(&Utc));
  }

  if let Ok(ndt) =
    NaiveDateTime::parse_from_str(
      token,
      COMPACT_UTC_FORMAT
    )
  {
    return Some(ndt.and_utc());
  }

  for fmt in NAIVE_TIMESTAMP_FORMATS {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return Some(ndt.and_utc());
    }
  }

  NaiveDate::parse_from_str(
    token, "%Y-%m-%d"
  )
  .ok()
  .and_then(|date| {
    date.and_hms_opt(0, 0, 0)
  })
  .map(|ndt| ndt.and_utc())
}

fn to_utc_from_local(
  local_naive: NaiveDateTime,
  tz: Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  if local_naive.year().abs()
    > MAX_ABS_YEAR
  {
    return Err(anyhow!(
      "local datetime out of range: \
       {context}"
    ));
  }

  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      Ok(first.min(second).with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime does not \
         exist in timezone {tz}: \
         {context}"
      ))
    }
  }
}

fn local_midnight(
  date: NaiveDate,
  tz: Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!(
        "failed to construct \
         midnight for {date}"
      )
    })?;
  to_utc_from_local(midnight, tz, context)
}

/// Parses a user supplied instant such
/// as `today`, `-3d` or `2024-02-29`.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return local_midnight(
        zoned_date(now, tz),
        tz,
        "today"
      );
    }
    | "tomorrow" | "yesterday" => {
      let today = zoned_date(now, tz);
      let date = if lower == "tomorrow" {
        today.succ_opt()
      } else {
        today.pred_opt()
      }
      .ok_or_else(|| {
        anyhow!(
          "{lower} is out of range"
        )
      })?;
      return local_midnight(
        date, tz, &lower
      );
    }
    | _ => {}
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(token)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let duration = match unit {
      | "d" => Duration::try_days(num),
      | "h" => Duration::try_hours(num),
      | "m" => {
        Duration::try_minutes(num)
      }
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ))
      }
    };

    let shifted = duration.and_then(|d| {
      if sign == "-" {
        now.checked_sub_signed(d)
      } else {
        now.checked_add_signed(d)
      }
    });
    return shifted
      .and_then(within_supported_range)
      .ok_or_else(|| {
        anyhow!(
          "relative offset out of \
           range: {token}"
        )
      });
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return local_midnight(
      date, tz, "date"
    );
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_local(
        ndt, tz, fmt
      );
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow/yesterday, \
     +Nd/+Nh/+Nm, RFC3339, \
     YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM"
  })
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };
  use serde_json::json;

  use super::{
    load_timezone_from_file,
    parse_date_expr,
    parse_timestamp,
    resolve_timezone,
    zoned_date
  };

  #[test]
  fn explicit_timezone_must_parse() {
    let tz = resolve_timezone(Some(
      "Europe/Berlin"
    ))
    .expect("valid tz");
    assert_eq!(tz, chrono_tz::Europe::Berlin);

    assert!(
      resolve_timezone(Some(
        "Mars/Olympus"
      ))
      .is_err()
    );
  }

  #[test]
  fn loads_timezone_from_time_config() {
    let dir =
      tempfile::tempdir().expect("tempdir");
    let flat = dir.path().join("flat.toml");
    std::fs::write(
      &flat,
      "timezone = \"Asia/Tokyo\"\n"
    )
    .expect("write flat");
    assert_eq!(
      load_timezone_from_file(&flat),
      Some(chrono_tz::Asia::Tokyo)
    );

    let nested =
      dir.path().join("nested.toml");
    std::fs::write(
      &nested,
      "[time]\ntimezone = \"America/Chicago\"\n"
    )
    .expect("write nested");
    assert_eq!(
      load_timezone_from_file(&nested),
      Some(chrono_tz::America::Chicago)
    );

    let missing =
      dir.path().join("missing.toml");
    assert_eq!(
      load_timezone_from_file(&missing),
      None
    );
  }

  #[test]
  fn parses_supported_timestamp_shapes() {
    let expected = Utc
      .with_ymd_and_hms(
        2024, 3, 5, 8, 30, 0
      )
      .single()
      .expect("valid instant");

    for raw in [
      json!("2024-03-05T08:30:00Z"),
      json!("2024-03-05T09:30:00+01:00"),
      json!("2024-03-05T08:30:00"),
      json!("2024-03-05 08:30:00.000"),
      json!("20240305T083000Z"),
      json!(1_709_627_400_000_i64)
    ] {
      assert_eq!(
        parse_timestamp(&raw),
        Some(expected),
        "{raw}"
      );
    }

    assert_eq!(
      parse_timestamp(&json!("2024-03-05"))
        .map(|dt| dt.date_naive()),
      NaiveDate::from_ymd_opt(2024, 3, 5)
    );
  }

  #[test]
  fn rejects_malformed_timestamps() {
    for raw in [
      json!(null),
      json!(true),
      json!(""),
      json!("yesterday-ish"),
      json!("2024-13-40"),
      json!({ "at": "2024-01-01" }),
      json!(8_210_266_876_799_999_i64),
      json!(i64::MIN),
      json!(1.0e300)
    ] {
      assert_eq!(
        parse_timestamp(&raw),
        None,
        "{raw}"
      );
    }
  }

  #[test]
  fn today_is_local_midnight() {
    let now = Utc
      .with_ymd_and_hms(
        2024, 6, 1, 23, 30, 0
      )
      .single()
      .expect("valid now");
    let tz = chrono_tz::Europe::Paris;
    let today =
      parse_date_expr("today", now, tz)
        .expect("parse today");
    assert_eq!(
      zoned_date(today, tz),
      NaiveDate::from_ymd_opt(2024, 6, 2)
        .expect("valid date")
    );
    assert_eq!(
      today,
      Utc
        .with_ymd_and_hms(
          2024, 6, 1, 22, 0, 0
        )
        .single()
        .expect("valid midnight")
    );
  }

  #[test]
  fn parses_relative_and_plain_dates() {
    let now = Utc
      .with_ymd_and_hms(
        2024, 6, 10, 12, 0, 0
      )
      .single()
      .expect("valid now");
    let tz = chrono_tz::UTC;

    let back =
      parse_date_expr("-3d", now, tz)
        .expect("parse relative");
    assert_eq!(
      zoned_date(back, tz),
      NaiveDate::from_ymd_opt(2024, 6, 7)
        .expect("valid date")
    );

    let plain = parse_date_expr(
      "2024-02-29",
      now,
      tz
    )
    .expect("parse date");
    assert_eq!(
      zoned_date(plain, tz),
      NaiveDate::from_ymd_opt(2024, 2, 29)
        .expect("valid date")
    );

    assert!(
      parse_date_expr("someday", now, tz)
        .is_err()
    );
  }

  #[test]
  fn accepts_instants_up_to_year_9999() {
    let end = parse_timestamp(&json!(
      253_402_300_799_000_i64
    ))
    .expect("last second of 9999");
    assert_eq!(
      zoned_date(
        end,
        chrono_tz::Asia::Tokyo
      ),
      NaiveDate::from_ymd_opt(10000, 1, 1)
        .expect("valid date")
    );
  }

  #[test]
  fn day_words_step_calendar_days_across_dst() {
    let tz = chrono_tz::America::New_York;

    // Clocks went forward on 2024-03-10.
    let after_spring = tz
      .with_ymd_and_hms(
        2024, 3, 11, 12, 0, 0
      )
      .single()
      .expect("valid now")
      .with_timezone(&Utc);
    let yesterday = parse_date_expr(
      "yesterday",
      after_spring,
      tz
    )
    .expect("parse yesterday");
    assert_eq!(
      yesterday,
      Utc
        .with_ymd_and_hms(
          2024, 3, 10, 5, 0, 0
        )
        .single()
        .expect("valid midnight")
    );

    // Clocks went back on 2024-11-03.
    let fall_back_day = tz
      .with_ymd_and_hms(
        2024, 11, 3, 12, 0, 0
      )
      .single()
      .expect("valid now")
      .with_timezone(&Utc);
    let tomorrow = parse_date_expr(
      "tomorrow",
      fall_back_day,
      tz
    )
    .expect("parse tomorrow");
    assert_eq!(
      zoned_date(tomorrow, tz),
      NaiveDate::from_ymd_opt(2024, 11, 4)
        .expect("valid date")
    );
    assert_eq!(
      tomorrow,
      Utc
        .with_ymd_and_hms(
          2024, 11, 4, 5, 0, 0
        )
        .single()
        .expect("valid midnight")
    );
  }

  #[test]
  fn huge_offsets_are_errors() {
    let now = Utc
      .with_ymd_and_hms(
        2024, 6, 10, 12, 0, 0
      )
      .single()
      .expect("valid now");
    let tz = chrono_tz::UTC;
    for raw in [
      "+999999999999999d",
      "-99999999999999999m",
      "+5000000d",
      "+262142-12-31"
    ] {
      assert!(
        parse_date_expr(raw, now, tz)
          .is_err(),
        "{raw}"
      );
    }
  }
}
