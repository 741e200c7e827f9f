//! Request and response bodies exchanged with the upstream service, and their
//! conversion into domain types.

use chrono::{DateTime, Datelike as _, NaiveDate, NaiveDateTime, Utc};
use rota_core::{
  time::{UtcWindow, parse_naive},
  trip::{TripFields, TripSnapshot},
  violation::{NonConformity, PositionSample},
};
use serde::{Deserialize, Serialize};

// ─── Timestamps ──────────────────────────────────────────────────────────────

/// Parse an upstream timestamp as local wall-clock time.
///
/// The trailing `Z` is not an offset in practice: the service reports local
/// time. Year 1 is the service's placeholder for "not set".
pub fn parse_wall_clock(raw: &str) -> Option<NaiveDateTime> {
  let raw = raw.trim();
  let ts = parse_naive(raw.strip_suffix('Z').unwrap_or(raw))?;
  (ts.year() > 1).then_some(ts)
}

fn wall_clock(raw: Option<String>) -> Option<NaiveDateTime> {
  raw.as_deref().and_then(parse_wall_clock)
}

fn trimmed(raw: Option<String>) -> Option<String> {
  raw.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

// ─── Trip grid ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GridFilter {
  pub property_name: &'static str,
  pub condition:     &'static str,
  pub value:         String,
}

impl GridFilter {
  pub fn effective_date(date: NaiveDate) -> Vec<Self> {
    vec![Self {
      property_name: "EffectiveDate",
      condition:     "Equal",
      value:         date.format("%Y-%m-%dT00:00:00Z").to_string(),
    }]
  }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GridItem {
  pub is_trip_canceled:         Option<bool>,
  pub line_integration_code:    Option<String>,
  pub estimated_departure_date: Option<String>,
  pub estimated_arrival_date:   Option<String>,
  pub real_departure_date:      Option<String>,
  #[serde(alias = "RealdArrivalDate")]
  pub real_arrival_date:        Option<String>,
  pub route_integration_code:   Option<String>,
  pub route_name:               Option<String>,
  pub direction_name:           Option<String>,
  pub shift:                    Option<String>,
  pub estimated_vehicle:        Option<String>,
  pub real_vehicle:             Option<String>,
  pub estimated_distance:       Option<f64>,
  pub travelled_distance:       Option<f64>,
  pub client_name:              Option<String>,
}

impl From<GridItem> for TripSnapshot {
  fn from(item: GridItem) -> Self {
    TripSnapshot {
      canceled:               item.is_trip_canceled.unwrap_or(false),
      route_integration_code: item
        .route_integration_code
        .map(|c| c.trim().to_owned())
        .unwrap_or_default(),
      fields:                 TripFields {
        line:                item.line_integration_code,
        estimated_departure: wall_clock(item.estimated_departure_date),
        estimated_arrival:   wall_clock(item.estimated_arrival_date),
        real_departure:      wall_clock(item.real_departure_date),
        real_arrival:        wall_clock(item.real_arrival_date),
        route_name:          item.route_name,
        direction_name:      item.direction_name,
        shift:               item.shift,
        estimated_vehicle:   item.estimated_vehicle,
        real_vehicle:        item.real_vehicle,
        estimated_distance:  item.estimated_distance,
        travelled_distance:  item.travelled_distance,
        client_name:         trimmed(item.client_name),
      },
    }
  }
}

// ─── Non-conformities ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NonConformityRequest {
  pub client_integration_code: String,
  pub initial_date:            String,
  pub final_date:              String,
  pub delay_tolerance:         u32,
  pub earliness_tolerance:     u32,
  pub inconformity_type:       u8,
}

impl NonConformityRequest {
  pub fn for_day(
    date: NaiveDate,
    client_integration_code: String,
    delay_tolerance: u32,
    earliness_tolerance: u32,
  ) -> Self {
    Self {
      client_integration_code,
      initial_date: format!("{date}T00:00:00.000Z"),
      final_date: format!("{date}T23:59:59.999Z"),
      delay_tolerance,
      earliness_tolerance,
      inconformity_type: 1,
    }
  }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NonConformityItem {
  pub line_name:    Option<String>,
  pub route_name:   Option<String>,
  pub direction:    Option<String>,
  pub real_vehicle: Option<String>,
  #[serde(rename = "URL")]
  pub url:          Option<String>,
}

impl From<NonConformityItem> for NonConformity {
  fn from(item: NonConformityItem) -> Self {
    NonConformity {
      line_name:    item.line_name,
      route_name:   item.route_name,
      direction:    item.direction,
      real_vehicle: item.real_vehicle,
      url:          item.url,
    }
  }
}

/// The endpoint answers with a bare object when there is a single result.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
  Many(Vec<T>),
  One(T),
}

impl<T> OneOrMany<T> {
  pub fn into_vec(self) -> Vec<T> {
    match self {
      OneOrMany::Many(v) => v,
      OneOrMany::One(t) => vec![t],
    }
  }
}

// ─── Positions ───────────────────────────────────────────────────────────────

const POSITION_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.000Z";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PositionRequest<'a> {
  pub tracked_unit_type:             u8,
  pub tracked_unit_integration_code: &'a str,
  pub start_date_position:           String,
  pub end_date_position:             String,
}

impl<'a> PositionRequest<'a> {
  pub fn new(vehicle: &'a str, window: UtcWindow) -> Self {
    Self {
      tracked_unit_type:             1,
      tracked_unit_integration_code: vehicle,
      start_date_position:           window.start.format(POSITION_FORMAT).to_string(),
      end_date_position:             window.end.format(POSITION_FORMAT).to_string(),
    }
  }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PositionItem {
  #[serde(alias = "EventDate")]
  pub date:     Option<String>,
  pub velocity: Option<f64>,
}

impl From<PositionItem> for PositionSample {
  fn from(item: PositionItem) -> Self {
    PositionSample {
      recorded_at: item
        .date
        .and_then(|d| DateTime::parse_from_rfc3339(&d).ok())
        .map(|d| d.with_timezone(&Utc)),
      velocity:    item.velocity.unwrap_or(0.0),
    }
  }
}
