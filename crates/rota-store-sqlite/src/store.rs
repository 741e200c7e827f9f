//! [`SqliteStore`]: the SQLite implementation of [`TripStore`].

use std::{
  collections::{BTreeSet, HashMap},
  path::{Path, PathBuf},
  sync::{Arc, PoisonError, RwLock},
  time::Duration,
};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{OptionalExtension as _, params, params_from_iter};
use rota_core::{
  reconcile::{PurgeOutcome, PurgeResult, ReconcileTarget, Removal},
  route::CanonicalRoute,
  store::TripStore,
  trip::{TripDraft, TripRecord},
  violation::{EnrichedRow, NewViolation, Verdict, ViolationRecord},
};

use crate::{
  Error, Result,
  encode::{
    RawEnriched, RawTrip, RawViolation, TRIP_COLUMNS, encode_date, encode_dt, encode_opt_ts,
    encode_ts,
  },
  schema::{MigrationOutcome, migrate},
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Location {
  File(PathBuf),
  Memory,
}

/// A trip-history store backed by a single SQLite file.
///
/// Clones share one session. The session is released when
/// the last clone is dropped.
#[derive(Clone)]
pub struct SqliteStore {
  conn:     Arc<RwLock<tokio_rusqlite::Connection>>,
  location: Location,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run migrations.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let conn = tokio_rusqlite::Connection::open(&path).await?;
    let store = Self {
      conn:     Arc::new(RwLock::new(conn)),
      location: Location::File(path),
    };
    store.migrate().await?;
    Ok(store)
  }

  /// Open an in-memory store, used by tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self {
      conn:     Arc::new(RwLock::new(conn)),
      location: Location::Memory,
    };
    store.migrate().await?;
    Ok(store)
  }

  /// Apply the schema and pending column migrations. Safe to run repeatedly.
  pub async fn migrate(&self) -> Result<Vec<MigrationOutcome>> {
    let outcomes = self
      .connection()
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(migrate(conn)?)
      })
      .await?;

    for outcome in &outcomes {
      if let MigrationOutcome::Added { table, column } = outcome {
        tracing::info!(table, column, "added column");
      }
    }
    Ok(outcomes)
  }

  pub(crate) fn connection(&self) -> tokio_rusqlite::Connection {
    self.conn.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  async fn reopen(&self) -> Result<()> {
    let Location::File(path) = &self.location else {
      return Err(Error::SessionLost("in-memory database".into()));
    };

    tracing::warn!(path = %path.display(), "database session closed; reopening");
    let conn = tokio_rusqlite::Connection::open(path).await?;
    conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(())
      })
      .await?;
    *self.conn.write().unwrap_or_else(PoisonError::into_inner) = conn;
    Ok(())
  }

  /// Replace the canonical route set. Administrative: the pipeline itself
  /// only reads this table.
  pub async fn import_canonical_routes(&self, routes: Vec<CanonicalRoute>) -> Result<usize> {
    let count = self
      .connection()
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM canonical_routes", [])?;
        {
          let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO canonical_routes (route_integration_code, route_name, client_name)
             VALUES (?1, ?2, ?3)",
          )?;
          for r in &routes {
            stmt.execute(params![r.route_integration_code.trim(), r.route_name, r.client_name])?;
          }
        }
        tx.commit()?;
        Ok(routes.len())
      })
      .await?;
    Ok(count)
  }

  /// Every stored trip for `date`, ordered by id.
  pub async fn trips_for_date(&self, date: NaiveDate) -> Result<Vec<TripRecord>> {
    let date_str = encode_date(date);
    let raws: Vec<RawTrip> = self
      .connection()
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {TRIP_COLUMNS} FROM trip_history WHERE service_date = ?1 ORDER BY id"
        ))?;
        let rows = stmt
          .query_map(params![date_str], RawTrip::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawTrip::into_record).collect()
  }

  /// The single last-execution marker, if any run has been recorded.
  pub async fn last_executed(&self) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = self
      .connection()
      .call(|conn| {
        Ok(
          conn
            .query_row("SELECT executed_at FROM last_execution WHERE id = 1", [], |r| r.get(0))
            .optional()?,
        )
      })
      .await?;

    raw
      .map(|s| {
        DateTime::parse_from_rfc3339(&s)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| Error::DateParse(e.to_string()))
      })
      .transpose()
  }
}

fn placeholders(n: usize) -> String { vec!["?"; n].join(",") }

// ─── TripStore impl ──────────────────────────────────────────────────────────

impl TripStore for SqliteStore {
  type Error = Error;

  // ── Session ───────────────────────────────────────────────────────────────

  async fn ensure_session(&self) -> Result<()> {
    let probe = self
      .connection()
      .call(|conn| {
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
      })
      .await;

    match probe {
      Ok(()) => Ok(()),
      Err(tokio_rusqlite::Error::ConnectionClosed) => self.reopen().await,
      Err(e) => Err(e.into()),
    }
  }

  async fn mark_executed(&self, at: DateTime<Utc>) -> Result<()> {
    let at_str = encode_dt(at);
    self
      .connection()
      .call(move |conn| {
        conn.execute(
          "INSERT INTO last_execution (id, executed_at) VALUES (1, ?1)
           ON CONFLICT (id) DO UPDATE SET executed_at = excluded.executed_at",
          params![at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Canonical routes ──────────────────────────────────────────────────────

  async fn canonical_routes(&self) -> Result<Vec<CanonicalRoute>> {
    let routes = self
      .connection()
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT route_integration_code, route_name, client_name FROM canonical_routes",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(CanonicalRoute {
              route_integration_code: row.get(0)?,
              route_name:             row.get(1)?,
              client_name:            row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(routes)
  }

  // ── History ───────────────────────────────────────────────────────────────

  async fn trips_on(
    &self,
    date: NaiveDate,
    codes: Vec<String>,
  ) -> Result<HashMap<String, TripRecord>> {
    if codes.is_empty() {
      return Ok(HashMap::new());
    }
    let date_str = encode_date(date);

    let raws: Vec<RawTrip> = self
      .connection()
      .call(move |conn| {
        let sql = format!(
          "SELECT {TRIP_COLUMNS} FROM trip_history
           WHERE service_date = ? AND route_integration_code IN ({})",
          placeholders(codes.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let args = std::iter::once(date_str).chain(codes);
        let rows = stmt
          .query_map(params_from_iter(args), RawTrip::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|raw| raw.into_record().map(|r| (r.route_integration_code.clone(), r)))
      .collect()
  }

  async fn client_names(&self, codes: Vec<String>) -> Result<Vec<(String, String)>> {
    if codes.is_empty() {
      return Ok(Vec::new());
    }

    let pairs = self
      .connection()
      .call(move |conn| {
        // Latest row per route wins when a route changed clients.
        let sql = format!(
          "SELECT route_integration_code, client_name FROM trip_history
           WHERE route_integration_code IN ({})
             AND client_name IS NOT NULL AND TRIM(client_name) != ''
           ORDER BY id",
          placeholders(codes.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params_from_iter(codes), |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(pairs)
  }

  async fn upsert_trips(&self, drafts: Vec<TripDraft>) -> Result<usize> {
    let written = self
      .connection()
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut written = 0;
        {
          let mut stmt = tx.prepare_cached(
            "INSERT INTO trip_history (
               route_integration_code, service_date, line,
               estimated_departure, estimated_arrival, real_departure, real_arrival,
               route_name, direction_name, shift, estimated_vehicle, real_vehicle,
               estimated_distance, travelled_distance, client_name
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT (route_integration_code, service_date) DO UPDATE SET
               line                = excluded.line,
               estimated_departure = excluded.estimated_departure,
               estimated_arrival   = excluded.estimated_arrival,
               real_departure      = excluded.real_departure,
               real_arrival        = excluded.real_arrival,
               route_name          = excluded.route_name,
               direction_name      = excluded.direction_name,
               shift               = excluded.shift,
               estimated_vehicle   = excluded.estimated_vehicle,
               real_vehicle        = excluded.real_vehicle,
               estimated_distance  = excluded.estimated_distance,
               travelled_distance  = excluded.travelled_distance,
               client_name         = excluded.client_name",
          )?;
          for d in &drafts {
            let f = &d.fields;
            written += stmt.execute(params![
              d.route_integration_code,
              encode_date(d.service_date),
              f.line,
              encode_opt_ts(f.estimated_departure),
              encode_opt_ts(f.estimated_arrival),
              encode_opt_ts(f.real_departure),
              encode_opt_ts(f.real_arrival),
              f.route_name,
              f.direction_name,
              f.shift,
              f.estimated_vehicle,
              f.real_vehicle,
              f.estimated_distance,
              f.travelled_distance,
              f.client_name,
            ])?;
          }
        }
        tx.commit()?;
        Ok(written)
      })
      .await?;
    Ok(written)
  }

  async fn backfill_travelled_distance(&self, since: NaiveDateTime) -> Result<usize> {
    let since_str = encode_ts(since);
    let updated = self
      .connection()
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE trip_history
           SET travelled_distance = CAST(estimated_distance AS INTEGER)
           WHERE real_arrival IS NOT NULL AND real_arrival != ''
             AND travelled_distance = 0
             AND estimated_distance IS NOT NULL
             AND estimated_departure >= ?1",
          params![since_str],
        )?)
      })
      .await?;
    Ok(updated)
  }

  async fn trip_exists(&self, id: i64) -> Result<bool> {
    let exists = self
      .connection()
      .call(move |conn| {
        Ok(
          conn
            .query_row("SELECT 1 FROM trip_history WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?
            .is_some(),
        )
      })
      .await?;
    Ok(exists)
  }

  // ── Violations ────────────────────────────────────────────────────────────

  async fn insert_violations(&self, violations: Vec<NewViolation>) -> Result<usize> {
    let inserted = self
      .connection()
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
          let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO violations
               (line_name, route_name, direction, real_vehicle, url, service_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          )?;
          for v in &violations {
            inserted += stmt.execute(params![
              v.line_name,
              v.route_name,
              v.direction,
              v.real_vehicle,
              v.url,
              encode_date(v.service_date),
            ])?;
          }
        }
        tx.commit()?;
        Ok(inserted)
      })
      .await?;
    Ok(inserted)
  }

  async fn get_violation(&self, id: i64) -> Result<Option<ViolationRecord>> {
    let raw: Option<RawViolation> = self
      .connection()
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT id, line_name, route_name, direction, real_vehicle, url,
                      service_date, violation_type
               FROM violations WHERE id = ?1",
              params![id],
              |row| {
                Ok(RawViolation {
                  id:             row.get(0)?,
                  line_name:      row.get(1)?,
                  route_name:     row.get(2)?,
                  direction:      row.get(3)?,
                  real_vehicle:   row.get(4)?,
                  url:            row.get(5)?,
                  service_date:   row.get(6)?,
                  violation_type: row.get(7)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawViolation::into_record).transpose()
  }

  async fn set_verdict(&self, id: i64, verdict: Verdict) -> Result<bool> {
    let label = verdict.as_ref().to_owned();
    let changed = self
      .connection()
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE violations SET violation_type = ?1
           WHERE id = ?2 AND (violation_type IS NULL OR TRIM(violation_type) = '')",
          params![label, id],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  // ── Reconciliation ────────────────────────────────────────────────────────

  async fn stored_keys(
    &self,
    target: ReconcileTarget,
    date: NaiveDate,
  ) -> Result<BTreeSet<String>> {
    let date_str = encode_date(date);
    let sql = match target {
      ReconcileTarget::Trips => {
        "SELECT DISTINCT route_integration_code FROM trip_history
         WHERE service_date = ?1 AND route_integration_code != ''"
      }
      ReconcileTarget::Violations => {
        "SELECT DISTINCT TRIM(LOWER(route_name)) FROM violations
         WHERE service_date = ?1 AND TRIM(route_name) != ''"
      }
    };

    let keys = self
      .connection()
      .call(move |conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
          .query_map(params![date_str], |row| row.get::<_, String>(0))?
          .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(keys)
  }

  async fn purge(
    &self,
    target: ReconcileTarget,
    date: NaiveDate,
    removals: Vec<Removal>,
  ) -> Result<Vec<PurgeResult>> {
    let date_str = encode_date(date);
    let sql = match target {
      ReconcileTarget::Trips => {
        "DELETE FROM trip_history WHERE route_integration_code = ?1 AND service_date = ?2"
      }
      ReconcileTarget::Violations => {
        "DELETE FROM violations WHERE TRIM(LOWER(route_name)) = ?1 AND service_date = ?2"
      }
    };

    let results = self
      .connection()
      .call(move |conn| {
        let mut tx = conn.transaction()?;
        let mut results = Vec::with_capacity(removals.len());
        for removal in removals {
          // A savepoint per pair: a failed delete rolls back alone.
          let sp = tx.savepoint()?;
          let outcome = match sp.execute(sql, params![removal.key, date_str]) {
            Ok(n) => {
              sp.commit()?;
              PurgeOutcome::Deleted(n)
            }
            Err(e) => {
              drop(sp);
              PurgeOutcome::Failed(e.to_string())
            }
          };
          results.push(PurgeResult { removal, outcome });
        }
        tx.commit()?;
        Ok(results)
      })
      .await?;
    Ok(results)
  }

  // ── Enriched view ─────────────────────────────────────────────────────────

  async fn clear_enriched_view(&self) -> Result<usize> {
    let removed = self
      .connection()
      .call(|conn| Ok(conn.execute("DELETE FROM enriched_violations", [])?))
      .await?;
    Ok(removed)
  }

  async fn violation_ids_after(&self, after: i64, limit: usize) -> Result<Vec<i64>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let ids = self
      .connection()
      .call(move |conn| {
        let mut stmt =
          conn.prepare("SELECT id FROM violations WHERE id > ?1 ORDER BY id LIMIT ?2")?;
        let rows = stmt
          .query_map(params![after, limit], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(ids)
  }

  async fn materialize_enriched(&self, violation_ids: Vec<i64>) -> Result<usize> {
    if violation_ids.is_empty() {
      return Ok(0);
    }

    let added = self
      .connection()
      .call(move |conn| {
        let sql = format!(
          "INSERT OR REPLACE INTO enriched_violations (
             violation_id, line_name, route_name, direction, real_vehicle, service_date,
             url, violation_type, client_name, real_departure, real_arrival, trip_id
           )
           SELECT
             v.id, v.line_name, v.route_name, v.direction, v.real_vehicle, v.service_date,
             v.url, v.violation_type,
             COALESCE(h.client_name, g.client_name),
             h.real_departure, h.real_arrival, h.id
           FROM violations v
           JOIN (
             SELECT TRIM(LOWER(route_name)) AS name_norm, MAX(client_name) AS client_name
             FROM canonical_routes
             GROUP BY TRIM(LOWER(route_name))
           ) g ON g.name_norm = TRIM(LOWER(v.route_name))
           JOIN (
             -- latest historical row per normalised route name and date
             SELECT hg.*
             FROM trip_history hg
             JOIN (
               SELECT MAX(id) AS max_id
               FROM trip_history
               GROUP BY TRIM(LOWER(route_name)), service_date
             ) latest ON hg.id = latest.max_id
           ) h ON TRIM(LOWER(h.route_name)) = TRIM(LOWER(v.route_name))
              AND h.service_date = v.service_date
           WHERE v.id IN ({})
             AND h.real_departure IS NOT NULL AND h.real_departure != ''",
          placeholders(violation_ids.len())
        );
        Ok(conn.execute(&sql, params_from_iter(violation_ids))?)
      })
      .await?;
    Ok(added)
  }

  async fn enriched_page(&self, offset: usize, limit: usize) -> Result<Vec<EnrichedRow>> {
    let offset = i64::try_from(offset).unwrap_or(i64::MAX);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawEnriched> = self
      .connection()
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT
             e.violation_id, e.route_name, e.real_vehicle, e.service_date,
             CASE WHEN v.id IS NULL THEN e.violation_type ELSE v.violation_type END,
             e.client_name, e.real_departure, e.real_arrival, e.trip_id
           FROM enriched_violations e
           LEFT JOIN violations v ON v.id = e.violation_id
           WHERE e.real_departure IS NOT NULL AND e.real_departure != ''
             AND e.real_arrival IS NOT NULL AND e.real_arrival != ''
           ORDER BY e.violation_id
           LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
          .query_map(params![limit, offset], |row| {
            Ok(RawEnriched {
              violation_id:   row.get(0)?,
              route_name:     row.get(1)?,
              real_vehicle:   row.get(2)?,
              service_date:   row.get(3)?,
              violation_type: row.get(4)?,
              client_name:    row.get(5)?,
              real_departure: row.get(6)?,
              real_arrival:   row.get(7)?,
              trip_id:        row.get(8)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEnriched::into_row).collect()
  }
}
