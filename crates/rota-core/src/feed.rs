//! The `TransitFeed` trait: the authoritative upstream telemetry service.

use std::future::Future;

use chrono::NaiveDate;

use crate::{
  time::UtcWindow,
  trip::TripSnapshot,
  violation::{NonConformity, PositionSample},
};

/// Read access to the upstream service, already authenticated.
pub trait TransitFeed: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// The full trip-grid snapshot for one calendar day, canceled items
  /// included.
  fn trip_grid(
    &self,
    date: NaiveDate,
  ) -> impl Future<Output = Result<Vec<TripSnapshot>, Self::Error>> + Send + '_;

  /// Trips flagged with a non-conformity on one calendar day.
  fn non_conformities(
    &self,
    date: NaiveDate,
  ) -> impl Future<Output = Result<Vec<NonConformity>, Self::Error>> + Send + '_;

  /// Position samples for `vehicle` over `window`. An empty vector means the
  /// service had nothing for that window.
  fn positions<'a>(
    &'a self,
    vehicle: &'a str,
    window: UtcWindow,
  ) -> impl Future<Output = Result<Vec<PositionSample>, Self::Error>> + Send + 'a;
}
