//! Violation records, the enriched view row, and the verdict rule.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// ─── Verdict ─────────────────────────────────────────────────────────────────

/// The terminal classification written once per violation record.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum Verdict {
  #[strum(serialize = "speed exceeded")]
  #[serde(rename = "speed exceeded")]
  SpeedExceeded,
  #[strum(serialize = "route deviation")]
  #[serde(rename = "route deviation")]
  RouteDeviation,
  /// The matched historical trip vanished before classification.
  #[strum(serialize = "inconsistent data (missing grade)")]
  #[serde(rename = "inconsistent data (missing grade)")]
  InconsistentData,
}

/// A timestamped velocity reading for a vehicle. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
  pub recorded_at: Option<DateTime<Utc>>,
  pub velocity:    f64,
}

/// Decide the verdict for a trip from its position samples.
///
/// Returns `None` when there are no samples: the record stays unclassified
/// and is retried on the next pass. Otherwise the verdict is
/// [`Verdict::RouteDeviation`] unless some sample is strictly faster than
/// `speed_limit`.
pub fn classify(samples: &[PositionSample], speed_limit: f64) -> Option<Verdict> {
  if samples.is_empty() {
    return None;
  }
  if samples.iter().any(|s| s.velocity > speed_limit) {
    Some(Verdict::SpeedExceeded)
  } else {
    Some(Verdict::RouteDeviation)
  }
}

// ─── Ingestion ───────────────────────────────────────────────────────────────

/// One item of the upstream non-conformity list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonConformity {
  pub line_name:    Option<String>,
  pub route_name:   Option<String>,
  pub direction:    Option<String>,
  pub real_vehicle: Option<String>,
  pub url:          Option<String>,
}

/// A violation ready to be inserted under its (route name, date) key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewViolation {
  pub line_name:    Option<String>,
  pub route_name:   String,
  pub direction:    Option<String>,
  pub real_vehicle: Option<String>,
  pub url:          Option<String>,
  pub service_date: NaiveDate,
}

impl NewViolation {
  /// Build an insertable violation, or `None` when the item has no route
  /// name to key it by.
  pub fn from_upstream(
    item: NonConformity,
    service_date: NaiveDate,
    rewrite: &PlaybackRewrite,
  ) -> Option<Self> {
    let route_name = item.route_name.filter(|n| !n.trim().is_empty())?;
    Some(Self {
      line_name: item.line_name,
      route_name,
      direction: item.direction,
      real_vehicle: item.real_vehicle,
      url: item
        .url
        .filter(|u| !u.is_empty())
        .map(|u| rewrite.apply(&u)),
      service_date,
    })
  }
}

/// Host substitution applied to upstream playback links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackRewrite {
  pub host:        String,
  pub replacement: String,
}

impl PlaybackRewrite {
  pub fn apply(&self, url: &str) -> String {
    if self.host.is_empty() {
      return url.to_owned();
    }
    url.replace(&self.host, &self.replacement)
  }
}

// ─── Stored rows ─────────────────────────────────────────────────────────────

/// A row of the violation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
  pub id:             i64,
  pub line_name:      Option<String>,
  pub route_name:     String,
  pub direction:      Option<String>,
  pub real_vehicle:   Option<String>,
  pub url:            Option<String>,
  pub service_date:   NaiveDate,
  /// `None` until the classifier writes a terminal value.
  pub violation_type: Option<String>,
}

/// A row of the enriched view: a violation joined with its client and the
/// latest matching historical trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRow {
  pub violation_id:   i64,
  pub route_name:     String,
  pub real_vehicle:   Option<String>,
  pub service_date:   NaiveDate,
  pub violation_type: Option<String>,
  pub client_name:    Option<String>,
  /// Raw timestamp text copied from the historical trip.
  pub real_departure: Option<String>,
  pub real_arrival:   Option<String>,
  /// Back-reference to the matched historical row.
  pub trip_id:        Option<i64>,
}

impl EnrichedRow {
  pub fn is_classified(&self) -> bool {
    self
      .violation_type
      .as_deref()
      .is_some_and(|v| !v.trim().is_empty())
  }
}
