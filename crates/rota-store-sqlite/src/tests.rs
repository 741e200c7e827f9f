//! Integration tests for `SqliteStore` against in-memory and temp-file
//! databases.

use chrono::{NaiveDate, NaiveDateTime, TimeZone as _, Utc};
use rota_core::{
  reconcile::{PurgeOutcome, ReconcileTarget, Removal, RemovalReason},
  route::CanonicalRoute,
  store::TripStore,
  trip::{TripDraft, TripFields},
  violation::{NewViolation, Verdict},
};
use rusqlite::params;

use crate::{Error, MigrationOutcome, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn day(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2024, 5, d).unwrap() }

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime { day(d).and_hms_opt(h, m, 0).unwrap() }

fn draft(code: &str, date: NaiveDate, route_name: &str) -> TripDraft {
  TripDraft {
    route_integration_code: code.into(),
    service_date:           date,
    fields:                 TripFields {
      route_name: Some(route_name.into()),
      estimated_departure: Some(date.and_hms_opt(6, 0, 0).unwrap()),
      ..Default::default()
    },
  }
}

fn violation(route_name: &str, date: NaiveDate) -> NewViolation {
  NewViolation {
    line_name:    Some("L1".into()),
    route_name:   route_name.into(),
    direction:    Some("Ida".into()),
    real_vehicle: Some("V-7".into()),
    url:          None,
    service_date: date,
  }
}

fn route(code: &str, name: &str, client: &str) -> CanonicalRoute {
  CanonicalRoute {
    route_integration_code: code.into(),
    route_name:             name.into(),
    client_name:            Some(client.into()),
  }
}

// ─── Schema ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn migrate_is_idempotent() {
  let s = store().await;

  // `open_in_memory` already migrated once.
  let second = s.migrate().await.unwrap();
  assert_eq!(second, vec![
    MigrationOutcome::AlreadyPresent { table: "violations", column: "url" },
    MigrationOutcome::AlreadyPresent { table: "violations", column: "violation_type" },
  ]);

  let version: i32 = s
    .connection()
    .call(|c| Ok(c.query_row("PRAGMA user_version", [], |r| r.get(0))?))
    .await
    .unwrap();
  assert_eq!(version, crate::schema::SCHEMA_VERSION);
}

#[tokio::test]
async fn migrate_adds_columns_to_legacy_table() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("legacy.db");
  {
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn
      .execute_batch(
        "CREATE TABLE violations (
           id INTEGER PRIMARY KEY AUTOINCREMENT,
           line_name TEXT, route_name TEXT NOT NULL, direction TEXT,
           real_vehicle TEXT, service_date TEXT NOT NULL,
           UNIQUE (route_name, service_date)
         );",
      )
      .unwrap();
  }

  let s = SqliteStore::open(&path).await.unwrap();
  s.insert_violations(vec![violation("Rota A", day(6))]).await.unwrap();
  let v = s.get_violation(1).await.unwrap().unwrap();
  assert_eq!(v.violation_type, None);
}

// ─── History ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_then_trips_on() {
  let s = store().await;
  let written = s
    .upsert_trips(vec![draft("R1", day(6), "Rota A"), draft("R2", day(6), "Rota B")])
    .await
    .unwrap();
  assert_eq!(written, 2);

  let found = s
    .trips_on(day(6), vec!["R1".into(), "R9".into()])
    .await
    .unwrap();
  assert_eq!(found.len(), 1);
  let r1 = &found["R1"];
  assert_eq!(r1.service_date, day(6));
  assert_eq!(r1.fields.route_name.as_deref(), Some("Rota A"));
  assert_eq!(r1.fields.estimated_departure, Some(at(6, 6, 0)));
}

#[tokio::test]
async fn upsert_overwrites_under_natural_key() {
  let s = store().await;
  s.upsert_trips(vec![draft("R1", day(6), "Rota A")]).await.unwrap();

  let mut updated = draft("R1", day(6), "Rota A");
  updated.fields.real_arrival = Some(at(6, 7, 30));
  updated.fields.client_name = Some("Prefeitura".into());
  s.upsert_trips(vec![updated]).await.unwrap();

  let rows = s.trips_for_date(day(6)).await.unwrap();
  assert_eq!(rows.len(), 1, "natural key must stay unique");
  assert!(rows[0].fields.is_completed());
  assert_eq!(rows[0].fields.client_name.as_deref(), Some("Prefeitura"));
}

#[tokio::test]
async fn trips_on_with_no_codes_is_empty() {
  let s = store().await;
  s.upsert_trips(vec![draft("R1", day(6), "Rota A")]).await.unwrap();
  assert!(s.trips_on(day(6), vec![]).await.unwrap().is_empty());
}

#[tokio::test]
async fn client_names_span_all_dates() {
  let s = store().await;
  let mut old = draft("R1", day(1), "Rota A");
  old.fields.client_name = Some("Prefeitura".into());
  let mut blank = draft("R2", day(1), "Rota B");
  blank.fields.client_name = Some("  ".into());
  s.upsert_trips(vec![old, blank, draft("R1", day(6), "Rota A")])
    .await
    .unwrap();

  let pairs = s
    .client_names(vec!["R1".into(), "R2".into()])
    .await
    .unwrap();
  assert_eq!(pairs, vec![("R1".to_string(), "Prefeitura".to_string())]);
}

#[tokio::test]
async fn backfill_only_touches_recent_completed_zero_distance() {
  let s = store().await;

  let mut fresh = draft("R1", day(6), "Rota A");
  fresh.fields.real_arrival = Some(at(6, 7, 0));
  fresh.fields.estimated_distance = Some(12.9);
  fresh.fields.travelled_distance = Some(0.0);

  let mut open = draft("R2", day(6), "Rota B");
  open.fields.estimated_distance = Some(8.0);
  open.fields.travelled_distance = Some(0.0);

  let mut stale = draft("R3", day(1), "Rota C");
  stale.fields.real_arrival = Some(at(1, 7, 0));
  stale.fields.estimated_distance = Some(5.5);
  stale.fields.travelled_distance = Some(0.0);

  s.upsert_trips(vec![fresh, open, stale]).await.unwrap();

  let updated = s.backfill_travelled_distance(at(3, 0, 0)).await.unwrap();
  assert_eq!(updated, 1);

  let rows = s.trips_on(day(6), vec!["R1".into(), "R2".into()]).await.unwrap();
  assert_eq!(rows["R1"].fields.travelled_distance, Some(12.0));
  assert_eq!(rows["R2"].fields.travelled_distance, Some(0.0));
}

#[tokio::test]
async fn trip_exists_follows_deletion() {
  let s = store().await;
  s.upsert_trips(vec![draft("R1", day(6), "Rota A")]).await.unwrap();
  let id = s.trips_for_date(day(6)).await.unwrap()[0].id;
  assert!(s.trip_exists(id).await.unwrap());

  s.purge(ReconcileTarget::Trips, day(6), vec![Removal {
    key:    "R1".into(),
    reason: RemovalReason::Missing,
  }])
  .await
  .unwrap();
  assert!(!s.trip_exists(id).await.unwrap());
}

// ─── Violations ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_violations_ignores_duplicates() {
  let s = store().await;
  let first = s
    .insert_violations(vec![violation("Rota A", day(6)), violation("Rota B", day(6))])
    .await
    .unwrap();
  assert_eq!(first, 2);

  let again = s
    .insert_violations(vec![violation("Rota A", day(6)), violation("Rota A", day(7))])
    .await
    .unwrap();
  assert_eq!(again, 1);
}

#[tokio::test]
async fn set_verdict_writes_once() {
  let s = store().await;
  s.insert_violations(vec![violation("Rota A", day(6))]).await.unwrap();

  assert!(s.set_verdict(1, Verdict::RouteDeviation).await.unwrap());
  assert!(!s.set_verdict(1, Verdict::SpeedExceeded).await.unwrap());

  let v = s.get_violation(1).await.unwrap().unwrap();
  assert_eq!(v.violation_type.as_deref(), Some("route deviation"));
}

#[tokio::test]
async fn get_violation_missing_returns_none() {
  let s = store().await;
  assert!(s.get_violation(42).await.unwrap().is_none());
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

#[tokio::test]
async fn stored_keys_normalise_violation_names() {
  let s = store().await;
  s.insert_violations(vec![violation("  Rota A ", day(6)), violation("ROTA B", day(6))])
    .await
    .unwrap();
  s.upsert_trips(vec![draft("R1", day(6), "x"), draft("R2", day(7), "y")])
    .await
    .unwrap();

  let names = s.stored_keys(ReconcileTarget::Violations, day(6)).await.unwrap();
  assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["rota a", "rota b"]);

  let codes = s.stored_keys(ReconcileTarget::Trips, day(6)).await.unwrap();
  assert_eq!(codes.into_iter().collect::<Vec<_>>(), vec!["R1"]);
}

#[tokio::test]
async fn purge_deletes_only_listed_pairs() {
  let s = store().await;
  s.upsert_trips(vec![
    draft("R1", day(6), "a"),
    draft("R2", day(6), "b"),
    draft("R1", day(7), "a"),
  ])
  .await
  .unwrap();

  let results = s
    .purge(ReconcileTarget::Trips, day(6), vec![
      Removal { key: "R1".into(), reason: RemovalReason::Canceled },
      Removal { key: "R9".into(), reason: RemovalReason::Missing },
    ])
    .await
    .unwrap();

  assert_eq!(results[0].outcome, PurgeOutcome::Deleted(1));
  assert_eq!(results[1].outcome, PurgeOutcome::Deleted(0));

  let left = s.stored_keys(ReconcileTarget::Trips, day(6)).await.unwrap();
  assert_eq!(left.into_iter().collect::<Vec<_>>(), vec!["R2"]);
  assert_eq!(s.trips_for_date(day(7)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn purge_isolates_a_failing_delete() {
  let s = store().await;
  s.insert_violations(vec![violation("Rota A", day(6)), violation("Rota B", day(6))])
    .await
    .unwrap();

  // Make deleting "rota a" fail without affecting "rota b".
  s.connection()
    .call(|c| {
      c.execute_batch(
        "CREATE TRIGGER block_rota_a BEFORE DELETE ON violations
         WHEN TRIM(LOWER(OLD.route_name)) = 'rota a'
         BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
      )?;
      Ok(())
    })
    .await
    .unwrap();

  let results = s
    .purge(ReconcileTarget::Violations, day(6), vec![
      Removal { key: "rota a".into(), reason: RemovalReason::Missing },
      Removal { key: "rota b".into(), reason: RemovalReason::Missing },
    ])
    .await
    .unwrap();

  assert!(matches!(results[0].outcome, PurgeOutcome::Failed(_)));
  assert_eq!(results[1].outcome, PurgeOutcome::Deleted(1));

  let left = s.stored_keys(ReconcileTarget::Violations, day(6)).await.unwrap();
  assert_eq!(left.into_iter().collect::<Vec<_>>(), vec!["rota a"]);
}

// ─── Enriched view ───────────────────────────────────────────────────────────

async fn seed_history_row(s: &SqliteStore, id: i64, code: &str, route_name: &str, departure: &str) {
  let code = code.to_owned();
  let route_name = route_name.to_owned();
  let departure = departure.to_owned();
  s.connection()
    .call(move |c| {
      c.execute(
        "INSERT INTO trip_history
           (id, route_integration_code, service_date, route_name, real_departure, real_arrival)
         VALUES (?1, ?2, '2024-05-06', ?3, ?4, '2024-05-06 08:00:00')",
        params![id, code, route_name, departure],
      )?;
      Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn enriched_view_takes_latest_history_row() {
  let s = store().await;
  s.import_canonical_routes(vec![route("R1", "Rota A", "Prefeitura")])
    .await
    .unwrap();
  seed_history_row(&s, 10, "R1", "Rota A", "2024-05-06 06:00:00").await;
  seed_history_row(&s, 12, "R1-B", " rota a", "2024-05-06 06:30:00").await;
  s.insert_violations(vec![violation("ROTA A", day(6))]).await.unwrap();

  let ids = s.violation_ids_after(0, 500).await.unwrap();
  assert_eq!(ids, vec![1]);
  assert_eq!(s.materialize_enriched(ids).await.unwrap(), 1);

  let page = s.enriched_page(0, 10).await.unwrap();
  assert_eq!(page.len(), 1);
  assert_eq!(page[0].trip_id, Some(12));
  assert_eq!(page[0].real_departure.as_deref(), Some("2024-05-06 06:30:00"));
  assert_eq!(page[0].client_name.as_deref(), Some("Prefeitura"));
}

#[tokio::test]
async fn enriched_view_skips_unmatched_and_undeparted() {
  let s = store().await;
  s.import_canonical_routes(vec![route("R1", "Rota A", "P"), route("R2", "Rota B", "P")])
    .await
    .unwrap();
  seed_history_row(&s, 1, "R2", "Rota B", "").await;
  s.insert_violations(vec![
    violation("Rota A", day(6)), // no history row
    violation("Rota B", day(6)), // history without real departure
    violation("Rota Z", day(6)), // not canonical
  ])
  .await
  .unwrap();

  let ids = s.violation_ids_after(0, 500).await.unwrap();
  assert_eq!(s.materialize_enriched(ids).await.unwrap(), 0);
  assert!(s.enriched_page(0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn enriched_page_reflects_base_verdict() {
  let s = store().await;
  s.import_canonical_routes(vec![route("R1", "Rota A", "P")]).await.unwrap();
  seed_history_row(&s, 1, "R1", "Rota A", "2024-05-06 06:00:00").await;
  s.insert_violations(vec![violation("Rota A", day(6))]).await.unwrap();
  s.materialize_enriched(vec![1]).await.unwrap();

  assert!(!s.enriched_page(0, 10).await.unwrap()[0].is_classified());
  s.set_verdict(1, Verdict::SpeedExceeded).await.unwrap();
  let page = s.enriched_page(0, 10).await.unwrap();
  assert_eq!(page[0].violation_type.as_deref(), Some("speed exceeded"));
}

#[tokio::test]
async fn violation_ids_after_pages_by_key() {
  let s = store().await;
  let batch = (1..=5).map(|d| violation("Rota A", day(d))).collect();
  s.insert_violations(batch).await.unwrap();

  assert_eq!(s.violation_ids_after(0, 2).await.unwrap(), vec![1, 2]);
  assert_eq!(s.violation_ids_after(2, 2).await.unwrap(), vec![3, 4]);
  assert_eq!(s.violation_ids_after(4, 2).await.unwrap(), vec![5]);
  assert!(s.violation_ids_after(5, 2).await.unwrap().is_empty());
}

#[tokio::test]
async fn clear_enriched_view_empties_it() {
  let s = store().await;
  s.import_canonical_routes(vec![route("R1", "Rota A", "P")]).await.unwrap();
  seed_history_row(&s, 1, "R1", "Rota A", "2024-05-06 06:00:00").await;
  s.insert_violations(vec![violation("Rota A", day(6))]).await.unwrap();
  s.materialize_enriched(vec![1]).await.unwrap();

  assert_eq!(s.clear_enriched_view().await.unwrap(), 1);
  assert!(s.enriched_page(0, 10).await.unwrap().is_empty());
}

// ─── Session ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ensure_session_reopens_file_store() {
  let dir = tempfile::tempdir().unwrap();
  let s = SqliteStore::open(dir.path().join("rota.db")).await.unwrap();
  s.upsert_trips(vec![draft("R1", day(6), "Rota A")]).await.unwrap();

  s.connection().close().await.unwrap();
  assert!(s.trips_for_date(day(6)).await.is_err());

  s.ensure_session().await.unwrap();
  assert_eq!(s.trips_for_date(day(6)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn ensure_session_cannot_reopen_memory_store() {
  let s = store().await;
  s.ensure_session().await.unwrap();

  s.connection().close().await.unwrap();
  assert!(matches!(s.ensure_session().await, Err(Error::SessionLost(_))));
}

#[tokio::test]
async fn mark_executed_keeps_a_single_row() {
  let s = store().await;
  assert!(s.last_executed().await.unwrap().is_none());

  let first = Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap();
  let second = Utc.with_ymd_and_hms(2024, 5, 6, 9, 10, 0).unwrap();
  s.mark_executed(first).await.unwrap();
  s.mark_executed(second).await.unwrap();

  assert_eq!(s.last_executed().await.unwrap(), Some(second));
}

#[tokio::test]
async fn canonical_routes_round_trip_import() {
  let s = store().await;
  s.import_canonical_routes(vec![route(" R1 ", "Rota A", "P"), route("R2", "Rota B", "Q")])
    .await
    .unwrap();
  let mut routes = s.canonical_routes().await.unwrap();
  routes.sort_by(|a, b| a.route_integration_code.cmp(&b.route_integration_code));
  assert_eq!(routes[0].route_integration_code, "R1");
  assert_eq!(routes.len(), 2);
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[test]
fn busy_and_locked_count_as_lock_contention() {
  let busy = Error::Database(tokio_rusqlite::Error::Rusqlite(
    rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY), None),
  ));
  let locked = Error::Database(tokio_rusqlite::Error::Rusqlite(
    rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED), None),
  ));
  let other = Error::DateParse("nope".into());

  assert!(busy.is_lock_contention());
  assert!(locked.is_lock_contention());
  assert!(!other.is_lock_contention());
}
