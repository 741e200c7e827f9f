//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Dates are stored as `YYYY-MM-DD`; timestamps as local
//! `YYYY-MM-DD HH:MM:SS`. Empty strings decode as absent, which keeps rows
//! written by older tools readable.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rota_core::{
  time::{STORED_FORMAT, parse_naive},
  trip::{TripFields, TripRecord},
  violation::{EnrichedRow, ViolationRecord},
};

use crate::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

// ─── NaiveDate ───────────────────────────────────────────────────────────────

pub fn encode_date(d: NaiveDate) -> String { d.format(DATE_FORMAT).to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── NaiveDateTime ───────────────────────────────────────────────────────────

pub fn encode_ts(ts: NaiveDateTime) -> String { ts.format(STORED_FORMAT).to_string() }

pub fn encode_opt_ts(ts: Option<NaiveDateTime>) -> Option<String> { ts.map(encode_ts) }

pub fn decode_opt_ts(s: Option<String>) -> Result<Option<NaiveDateTime>> {
  match s.as_deref().map(str::trim) {
    None | Some("") => Ok(None),
    Some(raw) => parse_naive(raw)
      .map(Some)
      .ok_or_else(|| Error::DateParse(format!("unrecognised timestamp {raw:?}"))),
  }
}

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

// ─── Text ────────────────────────────────────────────────────────────────────

fn non_empty(s: Option<String>) -> Option<String> { s.filter(|v| !v.trim().is_empty()) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawTrip`]'s field order.
pub const TRIP_COLUMNS: &str = "id, route_integration_code, service_date, line,
  estimated_departure, estimated_arrival, real_departure, real_arrival,
  route_name, direction_name, shift, estimated_vehicle, real_vehicle,
  estimated_distance, travelled_distance, client_name";

/// Raw values read directly from a `trip_history` row.
pub struct RawTrip {
  pub id:                     i64,
  pub route_integration_code: String,
  pub service_date:           String,
  pub line:                   Option<String>,
  pub estimated_departure:    Option<String>,
  pub estimated_arrival:      Option<String>,
  pub real_departure:         Option<String>,
  pub real_arrival:           Option<String>,
  pub route_name:             Option<String>,
  pub direction_name:         Option<String>,
  pub shift:                  Option<String>,
  pub estimated_vehicle:      Option<String>,
  pub real_vehicle:           Option<String>,
  pub estimated_distance:     Option<f64>,
  pub travelled_distance:     Option<f64>,
  pub client_name:            Option<String>,
}

impl RawTrip {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                     row.get(0)?,
      route_integration_code: row.get(1)?,
      service_date:           row.get(2)?,
      line:                   row.get(3)?,
      estimated_departure:    row.get(4)?,
      estimated_arrival:      row.get(5)?,
      real_departure:         row.get(6)?,
      real_arrival:           row.get(7)?,
      route_name:             row.get(8)?,
      direction_name:         row.get(9)?,
      shift:                  row.get(10)?,
      estimated_vehicle:      row.get(11)?,
      real_vehicle:           row.get(12)?,
      estimated_distance:     row.get(13)?,
      travelled_distance:     row.get(14)?,
      client_name:            row.get(15)?,
    })
  }

  pub fn into_record(self) -> Result<TripRecord> {
    Ok(TripRecord {
      id:                     self.id,
      route_integration_code: self.route_integration_code,
      service_date:           decode_date(&self.service_date)?,
      fields:                 TripFields {
        line:                non_empty(self.line),
        estimated_departure: decode_opt_ts(self.estimated_departure)?,
        estimated_arrival:   decode_opt_ts(self.estimated_arrival)?,
        real_departure:      decode_opt_ts(self.real_departure)?,
        real_arrival:        decode_opt_ts(self.real_arrival)?,
        route_name:          non_empty(self.route_name),
        direction_name:      non_empty(self.direction_name),
        shift:               non_empty(self.shift),
        estimated_vehicle:   non_empty(self.estimated_vehicle),
        real_vehicle:        non_empty(self.real_vehicle),
        estimated_distance:  self.estimated_distance,
        travelled_distance:  self.travelled_distance,
        client_name:         non_empty(self.client_name),
      },
    })
  }
}

/// Raw values read directly from a `violations` row.
pub struct RawViolation {
  pub id:             i64,
  pub line_name:      Option<String>,
  pub route_name:     String,
  pub direction:      Option<String>,
  pub real_vehicle:   Option<String>,
  pub url:            Option<String>,
  pub service_date:   String,
  pub violation_type: Option<String>,
}

impl RawViolation {
  pub fn into_record(self) -> Result<ViolationRecord> {
    Ok(ViolationRecord {
      id:             self.id,
      line_name:      self.line_name,
      route_name:     self.route_name,
      direction:      self.direction,
      real_vehicle:   self.real_vehicle,
      url:            self.url,
      service_date:   decode_date(&self.service_date)?,
      violation_type: non_empty(self.violation_type),
    })
  }
}

/// Raw values read from `enriched_violations` joined with `violations`.
pub struct RawEnriched {
  pub violation_id:   i64,
  pub route_name:     String,
  pub real_vehicle:   Option<String>,
  pub service_date:   String,
  pub violation_type: Option<String>,
  pub client_name:    Option<String>,
  pub real_departure: Option<String>,
  pub real_arrival:   Option<String>,
  pub trip_id:        Option<i64>,
}

impl RawEnriched {
  pub fn into_row(self) -> Result<EnrichedRow> {
    Ok(EnrichedRow {
      violation_id:   self.violation_id,
      route_name:     self.route_name,
      real_vehicle:   non_empty(self.real_vehicle),
      service_date:   decode_date(&self.service_date)?,
      violation_type: non_empty(self.violation_type),
      client_name:    self.client_name,
      real_departure: non_empty(self.real_departure),
      real_arrival:   non_empty(self.real_arrival),
      trip_id:        self.trip_id,
    })
  }
}
