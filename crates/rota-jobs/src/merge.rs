//! History merge: fold each day's trip-grid snapshot into the historical
//! table without regressing completed trips.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rota_core::{
  feed::TransitFeed,
  policy::Policy,
  store::TripStore,
  time::window_days,
  trip::{ClientDirectory, TripDraft, TripFields, TripRecord, TripSnapshot},
};
use tracing::Instrument as _;
use uuid::Uuid;

use crate::{
  report::{DayOutcome, MergeReport, MergeTally},
  retry::with_lock_retry,
};

/// Merge the last `policy.merge_window_days` days (most recent first), then
/// backfill travelled distances on recently completed trips.
///
/// A day that fails to fetch or write is reported and skipped; the run always
/// continues to the next day.
pub async fn merge_history<S, F>(
  store: &S,
  feed: &F,
  policy: &Policy,
  now: NaiveDateTime,
) -> MergeReport
where
  S: TripStore,
  F: TransitFeed,
{
  let span = tracing::info_span!("merge_history", run_id = %Uuid::new_v4());
  async move {
    let mut report = MergeReport::default();

    for date in window_days(now.date(), policy.merge_window_days) {
      let outcome = merge_day(store, feed, policy, date)
        .instrument(tracing::debug_span!("day", %date))
        .await;
      match &outcome {
        DayOutcome::Done(t) => tracing::info!(
          %date,
          written = t.written,
          discarded = t.discarded,
          folded = t.folded,
          "merged day"
        ),
        DayOutcome::Empty => tracing::info!(%date, "no trips upstream"),
        DayOutcome::Failed(reason) => tracing::warn!(%date, %reason, "day skipped"),
      }
      report.days.push((date, outcome));
    }

    let since = now - Duration::days(i64::from(policy.distance_backfill_days));
    report.backfilled = match store.backfill_travelled_distance(since).await {
      Ok(n) => Some(n),
      Err(e) => {
        tracing::warn!(error = %e, "distance backfill failed");
        None
      }
    };

    tracing::info!(
      written = report.written(),
      failed_days = report.failed_days(),
      backfilled = ?report.backfilled,
      "history merge finished"
    );
    report
  }
  .instrument(span)
  .await
}

async fn merge_day<S, F>(
  store: &S,
  feed: &F,
  policy: &Policy,
  date: NaiveDate,
) -> DayOutcome<MergeTally>
where
  S: TripStore,
  F: TransitFeed,
{
  let snapshot = match feed.trip_grid(date).await {
    Ok(items) => items,
    Err(e) => return DayOutcome::Failed(format!("fetching trip grid: {e}")),
  };
  if snapshot.is_empty() {
    return DayOutcome::Empty;
  }

  let total = snapshot.len();
  let live: Vec<TripSnapshot> = snapshot
    .into_iter()
    .filter(|s| !s.canceled && !s.route_integration_code.is_empty())
    .collect();
  let mut tally = MergeTally { discarded: total - live.len(), ..Default::default() };
  if live.is_empty() {
    return DayOutcome::Done(tally);
  }

  let codes: Vec<String> = live
    .iter()
    .map(|s| s.route_integration_code.clone())
    .collect::<BTreeSet<_>>()
    .into_iter()
    .collect();

  let mut existing: HashMap<String, TripRecord> = HashMap::with_capacity(codes.len());
  let mut client_pairs = Vec::new();
  for chunk in codes.chunks(policy.existence_chunk_size.max(1)) {
    match store.trips_on(date, chunk.to_vec()).await {
      Ok(found) => existing.extend(found),
      Err(e) => return DayOutcome::Failed(format!("loading stored trips: {e}")),
    }
    match store.client_names(chunk.to_vec()).await {
      Ok(pairs) => client_pairs.extend(pairs),
      Err(e) => return DayOutcome::Failed(format!("loading client names: {e}")),
    }
  }
  let clients: ClientDirectory = client_pairs.into_iter().collect();

  let drafts = fold_snapshot(live, &existing, &clients, date, &mut tally);

  match with_lock_retry(policy, || store.upsert_trips(drafts.clone())).await {
    Ok(written) => {
      tally.written = written;
      DayOutcome::Done(tally)
    }
    Err(e) => DayOutcome::Failed(format!("writing {} trips: {e}", drafts.len())),
  }
}

/// Apply the merge rule to every live item, in snapshot order. A route code
/// seen twice merges into the row produced by its first occurrence.
fn fold_snapshot(
  live: Vec<TripSnapshot>,
  existing: &HashMap<String, TripRecord>,
  clients: &ClientDirectory,
  date: NaiveDate,
  tally: &mut MergeTally,
) -> Vec<TripDraft> {
  let mut merged: BTreeMap<String, TripFields> = BTreeMap::new();

  for item in live {
    let code = item.route_integration_code;
    let mut incoming = item.fields;
    if incoming.client_name.is_none() {
      incoming.client_name = clients.get(&code).map(str::to_owned);
    }

    let base = match merged.get(&code) {
      Some(fields) => {
        tally.folded += 1;
        Some(fields)
      }
      None => existing.get(&code).map(|r| &r.fields),
    };
    let fields = match base {
      Some(stored) => stored.merge(&incoming),
      None => incoming,
    };
    merged.insert(code, fields);
  }

  merged
    .into_iter()
    .map(|(route_integration_code, fields)| TripDraft {
      route_integration_code,
      service_date: date,
      fields,
    })
    .collect()
}
