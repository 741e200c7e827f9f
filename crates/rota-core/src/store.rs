//! The `TripStore` trait.
//!
//! Implemented by storage backends (e.g. `rota-store-sqlite`). The jobs in
//! `rota-jobs` depend on this abstraction, not on any concrete backend.

use std::{
  collections::{BTreeSet, HashMap},
  future::Future,
};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::{
  reconcile::{PurgeResult, ReconcileTarget, Removal},
  route::CanonicalRoute,
  trip::{TripDraft, TripRecord},
  violation::{EnrichedRow, NewViolation, Verdict, ViolationRecord},
};

/// Errors a store can raise, with enough shape for the retry policy.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  /// Whether the failure was a lock-wait timeout that may succeed on retry.
  fn is_lock_contention(&self) -> bool;
}

/// Abstraction over the relational store backing the pipeline.
///
/// All methods return `Send` futures so jobs can be spawned onto a
/// multi-threaded runtime.
pub trait TripStore: Send + Sync {
  type Error: StoreError;

  // ── Session ───────────────────────────────────────────────────────────

  /// Probe the session and re-establish it if it has gone away.
  fn ensure_session(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Record the time of the latest successful history run.
  fn mark_executed(
    &self,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Canonical routes ──────────────────────────────────────────────────

  fn canonical_routes(
    &self,
  ) -> impl Future<Output = Result<Vec<CanonicalRoute>, Self::Error>> + Send + '_;

  // ── History ───────────────────────────────────────────────────────────

  /// Stored trips on `date` for any of `codes`, keyed by route code.
  fn trips_on(
    &self,
    date: NaiveDate,
    codes: Vec<String>,
  ) -> impl Future<Output = Result<HashMap<String, TripRecord>, Self::Error>> + Send + '_;

  /// `(route code, client name)` pairs from stored trips on any date, for
  /// codes in `codes` that have a client recorded.
  fn client_names(
    &self,
    codes: Vec<String>,
  ) -> impl Future<Output = Result<Vec<(String, String)>, Self::Error>> + Send + '_;

  /// Write merged rows under their (route code, date) key in a single
  /// transaction. Returns the number of rows written.
  fn upsert_trips(
    &self,
    drafts: Vec<TripDraft>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Set `travelled_distance` to the floor of `estimated_distance` on
  /// completed trips that recorded zero and departed at or after `since`.
  fn backfill_travelled_distance(
    &self,
    since: NaiveDateTime,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Whether a historical row with this primary key still exists.
  fn trip_exists(&self, id: i64) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Violations ────────────────────────────────────────────────────────

  /// Insert violations, ignoring any whose (route name, date) already
  /// exists. Returns the number inserted.
  fn insert_violations(
    &self,
    violations: Vec<NewViolation>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  fn get_violation(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<ViolationRecord>, Self::Error>> + Send + '_;

  /// Write a verdict on the base violation table. Only an unclassified row
  /// is updated; returns whether a row changed.
  fn set_verdict(
    &self,
    id: i64,
    verdict: Verdict,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Reconciliation ────────────────────────────────────────────────────

  /// Distinct identifiers stored under `date` in the target table.
  fn stored_keys(
    &self,
    target: ReconcileTarget,
    date: NaiveDate,
  ) -> impl Future<Output = Result<BTreeSet<String>, Self::Error>> + Send + '_;

  /// Delete each (key, date) pair in one transaction, isolating failures
  /// per pair, and commit once.
  fn purge(
    &self,
    target: ReconcileTarget,
    date: NaiveDate,
    removals: Vec<Removal>,
  ) -> impl Future<Output = Result<Vec<PurgeResult>, Self::Error>> + Send + '_;

  // ── Enriched view ─────────────────────────────────────────────────────

  /// Remove every row of the enriched view. Returns the number removed.
  fn clear_enriched_view(&self) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Violation ids greater than `after`, ascending, at most `limit`.
  fn violation_ids_after(
    &self,
    after: i64,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<i64>, Self::Error>> + Send + '_;

  /// Join the given violations against the canonical routes and the latest
  /// historical trip per (normalised route name, date), and append the
  /// matches to the enriched view. Returns the number of rows added.
  fn materialize_enriched(
    &self,
    violation_ids: Vec<i64>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// A page of enriched rows whose trip has both real timestamps, in
  /// ascending violation order. `violation_type` reflects the base table.
  fn enriched_page(
    &self,
    offset: usize,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<EnrichedRow>, Self::Error>> + Send + '_;
}
