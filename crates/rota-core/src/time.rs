//! Local-time handling.
//!
//! Trip timestamps are wall-clock times in the operator's zone. Stored text
//! may be naive (interpreted in that zone) or carry an explicit offset
//! (converted into it). Position telemetry is requested in UTC.

use std::str::FromStr as _;

use chrono::{
  DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone as _, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Canonical text form of a naive timestamp in the store.
pub const STORED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_FORMATS: &[&str] = &[
  STORED_FORMAT,
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%dT%H:%M:%S%.f",
  "%d/%m/%Y %H:%M:%S",
  "%d/%m/%Y %H:%M",
];

pub fn parse_timezone(name: &str) -> Result<Tz> {
  Tz::from_str(name).map_err(|_| Error::UnknownTimezone(name.to_owned()))
}

/// Today's date in `tz`.
pub fn local_today(tz: Tz) -> NaiveDate { Utc::now().with_timezone(&tz).date_naive() }

/// The `days` dates ending at `today`, most recent first.
pub fn window_days(today: NaiveDate, days: u32) -> impl Iterator<Item = NaiveDate> {
  (0..i64::from(days)).map(move |back| today - Duration::days(back))
}

/// Parse a timestamp without an offset in any of the accepted layouts.
pub fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
  let raw = raw.trim();
  NAIVE_FORMATS
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Parse a timestamp into the local zone: naive text is taken as local time,
/// text with an offset is converted.
pub fn parse_local(raw: &str, tz: Tz) -> Option<DateTime<Tz>> {
  let raw = raw.trim();
  if raw.is_empty() {
    return None;
  }
  if let Ok(dt) = DateTime::<FixedOffset>::parse_from_rfc3339(raw) {
    return Some(dt.with_timezone(&tz));
  }
  if let Ok(dt) = DateTime::<FixedOffset>::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
    return Some(dt.with_timezone(&tz));
  }
  let naive = parse_naive(raw)?;
  tz.from_local_datetime(&naive).earliest()
}

/// A closed UTC interval used for position-history requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtcWindow {
  pub start: DateTime<Utc>,
  pub end:   DateTime<Utc>,
}

impl UtcWindow {
  /// Build the request window for a trip from its stored start/end text.
  pub fn from_local(start: &str, end: &str, tz: Tz) -> Option<Self> {
    Some(Self {
      start: parse_local(start, tz)?.with_timezone(&Utc),
      end:   parse_local(end, tz)?.with_timezone(&Utc),
    })
  }
}
