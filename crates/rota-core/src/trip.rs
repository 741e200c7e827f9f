//! Trip schedule records and the completed-trip merge rule.
//!
//! The historical table holds one row per (route integration code, service
//! date). A row whose `real_arrival` is set is *completed*: its recorded facts
//! are final and later snapshots may only fill fields that are still empty.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ─── Fields ──────────────────────────────────────────────────────────────────

/// The mutable payload of a trip, shared by snapshots and stored records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripFields {
  pub line:                Option<String>,
  pub estimated_departure: Option<NaiveDateTime>,
  pub estimated_arrival:   Option<NaiveDateTime>,
  pub real_departure:      Option<NaiveDateTime>,
  pub real_arrival:        Option<NaiveDateTime>,
  pub route_name:          Option<String>,
  pub direction_name:      Option<String>,
  pub shift:               Option<String>,
  pub estimated_vehicle:   Option<String>,
  pub real_vehicle:        Option<String>,
  pub estimated_distance:  Option<f64>,
  pub travelled_distance:  Option<f64>,
  pub client_name:         Option<String>,
}

impl TripFields {
  /// A trip is completed once its real arrival has been recorded.
  pub fn is_completed(&self) -> bool { self.real_arrival.is_some() }

  /// Merge an incoming snapshot into the stored fields.
  ///
  /// Open trips take every field from the snapshot, except that
  /// `real_departure`, `real_arrival`, `real_vehicle` and `client_name` are
  /// never cleared by an absent incoming value. Completed trips keep every
  /// stored value; a snapshot only fills fields that are null, blank or a
  /// zero distance.
  pub fn merge(&self, incoming: &TripFields) -> TripFields {
    if self.is_completed() {
      return self.fill_gaps(incoming);
    }

    TripFields {
      line:                incoming.line.clone(),
      estimated_departure: incoming.estimated_departure,
      estimated_arrival:   incoming.estimated_arrival,
      real_departure:      incoming.real_departure.or(self.real_departure),
      real_arrival:        incoming.real_arrival.or(self.real_arrival),
      route_name:          incoming.route_name.clone(),
      direction_name:      incoming.direction_name.clone(),
      shift:               incoming.shift.clone(),
      estimated_vehicle:   incoming.estimated_vehicle.clone(),
      real_vehicle:        coalesce_text(&incoming.real_vehicle, &self.real_vehicle),
      estimated_distance:  incoming.estimated_distance,
      travelled_distance:  incoming.travelled_distance,
      client_name:         coalesce_text(&incoming.client_name, &self.client_name),
    }
  }

  fn fill_gaps(&self, incoming: &TripFields) -> TripFields {
    TripFields {
      line:                coalesce_text(&self.line, &incoming.line),
      estimated_departure: self.estimated_departure.or(incoming.estimated_departure),
      estimated_arrival:   self.estimated_arrival.or(incoming.estimated_arrival),
      real_departure:      self.real_departure.or(incoming.real_departure),
      real_arrival:        self.real_arrival.or(incoming.real_arrival),
      route_name:          coalesce_text(&self.route_name, &incoming.route_name),
      direction_name:      coalesce_text(&self.direction_name, &incoming.direction_name),
      shift:               coalesce_text(&self.shift, &incoming.shift),
      estimated_vehicle:   coalesce_text(&self.estimated_vehicle, &incoming.estimated_vehicle),
      real_vehicle:        coalesce_text(&self.real_vehicle, &incoming.real_vehicle),
      estimated_distance:  coalesce_distance(self.estimated_distance, incoming.estimated_distance),
      travelled_distance:  coalesce_distance(self.travelled_distance, incoming.travelled_distance),
      client_name:         coalesce_text(&self.client_name, &incoming.client_name),
    }
  }
}

/// `preferred` unless it is null or blank, then `fallback`.
fn coalesce_text(preferred: &Option<String>, fallback: &Option<String>) -> Option<String> {
  match preferred.as_deref().map(str::trim) {
    Some(s) if !s.is_empty() => preferred.clone(),
    _ => fallback.clone(),
  }
}

/// `preferred` unless it is null or zero, then `fallback` if positive.
fn coalesce_distance(preferred: Option<f64>, fallback: Option<f64>) -> Option<f64> {
  match (preferred, fallback) {
    (Some(d), _) if d > 0.0 => Some(d),
    (_, Some(d)) if d > 0.0 => Some(d),
    _ => preferred.or(fallback),
  }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// One item of an upstream trip-grid snapshot for a single day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripSnapshot {
  pub canceled:               bool,
  pub route_integration_code: String,
  pub fields:                 TripFields,
}

// ─── Stored record ───────────────────────────────────────────────────────────

/// A row of the historical trip table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
  pub id:                     i64,
  pub route_integration_code: String,
  pub service_date:           NaiveDate,
  pub fields:                 TripFields,
}

/// A fully merged row ready to be written under its natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripDraft {
  pub route_integration_code: String,
  pub service_date:           NaiveDate,
  pub fields:                 TripFields,
}

// ─── Client attribution ──────────────────────────────────────────────────────

/// Route identifier → client name, built once per run from stored records.
///
/// Used to keep a trip attributed to its client when a later snapshot omits
/// the client name.
#[derive(Debug, Clone, Default)]
pub struct ClientDirectory(HashMap<String, String>);

impl ClientDirectory {
  pub fn get(&self, route_integration_code: &str) -> Option<&str> {
    self.0.get(route_integration_code).map(String::as_str)
  }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl FromIterator<(String, String)> for ClientDirectory {
  fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
    Self(
      iter
        .into_iter()
        .filter(|(code, client)| !code.is_empty() && !client.trim().is_empty())
        .map(|(code, client)| (code, client.trim().to_owned()))
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;

  fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 6)
      .unwrap()
      .and_hms_opt(h, m, 0)
      .unwrap()
  }

  fn completed() -> TripFields {
    TripFields {
      line:                Some("L10".into()),
      estimated_departure: Some(at(6, 0)),
      estimated_arrival:   Some(at(7, 0)),
      real_departure:      Some(at(6, 5)),
      real_arrival:        Some(at(7, 10)),
      route_name:          Some("Rota Norte".into()),
      direction_name:      Some("Ida".into()),
      shift:               Some("Manhã".into()),
      estimated_vehicle:   Some("V-1".into()),
      real_vehicle:        Some("V-2".into()),
      estimated_distance:  Some(12.7),
      travelled_distance:  Some(12.0),
      client_name:         Some("Prefeitura".into()),
    }
  }

  #[test]
  fn completed_trip_ignores_estimate_only_snapshot() {
    let stored = completed();
    let incoming = TripFields {
      estimated_departure: Some(at(6, 30)),
      estimated_arrival:   Some(at(7, 30)),
      ..Default::default()
    };

    let merged = stored.merge(&incoming);
    assert_eq!(merged.real_departure, stored.real_departure);
    assert_eq!(merged.real_arrival, stored.real_arrival);
    assert_eq!(merged.real_vehicle, stored.real_vehicle);
    assert_eq!(merged.estimated_vehicle, stored.estimated_vehicle);
    assert_eq!(merged.estimated_distance, stored.estimated_distance);
    assert_eq!(merged.travelled_distance, stored.travelled_distance);
    assert_eq!(merged.client_name, stored.client_name);
  }

  #[test]
  fn completed_trip_is_fixed_point_of_identical_snapshot() {
    let stored = completed();
    assert_eq!(stored.merge(&stored.clone()), stored);
  }

  #[test]
  fn completed_trip_ignores_blank_and_zero_values() {
    let stored = completed();
    let incoming = TripFields {
      real_vehicle:       Some("   ".into()),
      travelled_distance: Some(0.0),
      client_name:        Some(String::new()),
      ..Default::default()
    };

    let merged = stored.merge(&incoming);
    assert_eq!(merged.real_vehicle.as_deref(), Some("V-2"));
    assert_eq!(merged.travelled_distance, Some(12.0));
    assert_eq!(merged.client_name.as_deref(), Some("Prefeitura"));
  }

  #[test]
  fn completed_trip_keeps_recorded_vehicles_and_distances() {
    let stored = completed();
    let incoming = TripFields {
      estimated_vehicle:  Some("V-9".into()),
      real_vehicle:       Some("V-8".into()),
      estimated_distance: Some(30.0),
      travelled_distance: Some(29.5),
      real_arrival:       Some(at(8, 0)),
      shift:              Some("Tarde".into()),
      ..Default::default()
    };

    assert_eq!(stored.merge(&incoming), stored);
  }

  #[test]
  fn completed_trip_fills_only_empty_fields() {
    let stored = TripFields {
      real_vehicle: Some(" ".into()),
      travelled_distance: Some(0.0),
      direction_name: None,
      ..completed()
    };
    let incoming = TripFields {
      real_vehicle:       Some("V-5".into()),
      travelled_distance: Some(11.5),
      direction_name:     Some("Volta".into()),
      estimated_vehicle:  Some("V-9".into()),
      ..Default::default()
    };

    let merged = stored.merge(&incoming);
    assert_eq!(merged.real_vehicle.as_deref(), Some("V-5"));
    assert_eq!(merged.travelled_distance, Some(11.5));
    assert_eq!(merged.direction_name.as_deref(), Some("Volta"));
    assert_eq!(merged.estimated_vehicle.as_deref(), Some("V-1"));
  }

  #[test]
  fn open_trip_takes_snapshot_but_keeps_real_departure() {
    let stored = TripFields {
      real_departure: Some(at(6, 5)),
      real_vehicle:   Some("V-2".into()),
      shift:          Some("Manhã".into()),
      ..Default::default()
    };
    let incoming = TripFields {
      estimated_departure: Some(at(6, 0)),
      shift:               Some("Tarde".into()),
      ..Default::default()
    };

    let merged = stored.merge(&incoming);
    assert_eq!(merged.real_departure, Some(at(6, 5)));
    assert_eq!(merged.real_vehicle.as_deref(), Some("V-2"));
    assert_eq!(merged.shift.as_deref(), Some("Tarde"));
    assert_eq!(merged.estimated_departure, Some(at(6, 0)));
  }

  #[test]
  fn open_trip_completes_when_arrival_arrives() {
    let stored = TripFields { real_departure: Some(at(6, 5)), ..Default::default() };
    let incoming = TripFields { real_arrival: Some(at(7, 0)), ..Default::default() };

    let merged = stored.merge(&incoming);
    assert!(merged.is_completed());
    assert_eq!(merged.real_departure, Some(at(6, 5)));
  }

  #[test]
  fn client_directory_skips_blank_names() {
    let dir: ClientDirectory = vec![
      ("R1".to_owned(), " Escola A ".to_owned()),
      ("R2".to_owned(), "  ".to_owned()),
    ]
    .into_iter()
    .collect();

    assert_eq!(dir.get("R1"), Some("Escola A"));
    assert_eq!(dir.get("R2"), None);
    assert_eq!(dir.len(), 1);
  }
}
