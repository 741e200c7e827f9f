//! Reconciliation: purge stored trips and violations that the upstream grid
//! canceled or silently dropped.

use chrono::NaiveDate;
use rota_core::{
  feed::TransitFeed,
  policy::Policy,
  reconcile::{PurgeOutcome, ReconcileTarget, SnapshotKeys, plan_removals},
  route::RouteCatalog,
  store::TripStore,
  time::window_days,
  trip::TripSnapshot,
};
use tracing::Instrument as _;
use uuid::Uuid;

use crate::{
  Error, Result,
  report::{DayOutcome, PassDay, PurgeTally, ReconcileReport},
};

const TARGETS: [ReconcileTarget; 2] = [ReconcileTarget::Trips, ReconcileTarget::Violations];

/// Run both reconciliation passes over the last
/// `policy.reconcile_window_days` days, most recent first.
///
/// The day's grid is fetched once and feeds both passes. Only a failure to
/// load the canonical route set aborts the run.
pub async fn reconcile<S, F>(
  store: &S,
  feed: &F,
  policy: &Policy,
  today: NaiveDate,
) -> Result<ReconcileReport>
where
  S: TripStore,
  F: TransitFeed,
{
  let span = tracing::info_span!("reconcile", run_id = %Uuid::new_v4());
  async move {
    let catalog: RouteCatalog = store
      .canonical_routes()
      .await
      .map_err(Error::store)?
      .into_iter()
      .collect();
    if catalog.is_empty() {
      tracing::warn!("canonical route set is empty; nothing can be removed");
    }

    let mut report = ReconcileReport::default();
    for date in window_days(today, policy.reconcile_window_days) {
      let snapshot = feed.trip_grid(date).await;
      for target in TARGETS {
        let outcome = match &snapshot {
          Err(e) => DayOutcome::Failed(format!("fetching trip grid: {e}")),
          Ok(items) if items.is_empty() => DayOutcome::Empty,
          Ok(items) => {
            run_pass(store, &catalog, target, date, items)
              .instrument(tracing::debug_span!("pass", %target, %date))
              .await
          }
        };
        log_pass(target, date, &outcome);
        report.passes.push(PassDay { date, target, outcome });
      }
    }

    for target in TARGETS {
      let total = report.total(target);
      tracing::info!(
        %target,
        canceled = total.canceled,
        missing = total.missing,
        rows = total.rows,
        failed = total.failed,
        "reconciliation pass finished"
      );
    }
    Ok(report)
  }
  .instrument(span)
  .await
}

/// The key a snapshot item contributes to `target`'s diff.
fn snapshot_key(
  target: ReconcileTarget,
  catalog: &RouteCatalog,
  item: &TripSnapshot,
) -> Option<String> {
  match target {
    ReconcileTarget::Trips => Some(item.route_integration_code.clone()),
    // Violations are keyed by name, so only codes with a canonical name count.
    ReconcileTarget::Violations => {
      catalog.name_for(&item.route_integration_code).map(str::to_owned)
    }
  }
}

fn authorised(target: ReconcileTarget, catalog: &RouteCatalog, key: &str) -> bool {
  match target {
    ReconcileTarget::Trips => catalog.contains_code(key),
    ReconcileTarget::Violations => catalog.contains_name(key),
  }
}

async fn run_pass<S: TripStore>(
  store: &S,
  catalog: &RouteCatalog,
  target: ReconcileTarget,
  date: NaiveDate,
  items: &[TripSnapshot],
) -> DayOutcome<PurgeTally> {
  let keys = SnapshotKeys::collect(items, |i| i.canceled, |i| snapshot_key(target, catalog, i));

  let stored = match store.stored_keys(target, date).await {
    Ok(stored) => stored,
    Err(e) => return DayOutcome::Failed(format!("loading stored keys: {e}")),
  };

  let plan = plan_removals(&stored, &keys, |k| authorised(target, catalog, k));
  if plan.is_empty() {
    return DayOutcome::Done(PurgeTally::default());
  }

  match store.purge(target, date, plan).await {
    Ok(results) => {
      for r in &results {
        match &r.outcome {
          PurgeOutcome::Deleted(rows) => tracing::info!(
            %target,
            %date,
            route = %r.removal.key,
            reason = %r.removal.reason,
            rows,
            "removed"
          ),
          PurgeOutcome::Failed(error) => tracing::warn!(
            %target,
            %date,
            route = %r.removal.key,
            reason = %r.removal.reason,
            %error,
            "removal failed; rolled back"
          ),
        }
      }
      DayOutcome::Done(PurgeTally::from_results(results))
    }
    Err(e) => DayOutcome::Failed(format!("purging: {e}")),
  }
}

fn log_pass(target: ReconcileTarget, date: NaiveDate, outcome: &DayOutcome<PurgeTally>) {
  match outcome {
    DayOutcome::Done(t) => tracing::debug!(
      %target,
      %date,
      canceled = t.canceled,
      missing = t.missing,
      failed = t.failed,
      "day reconciled"
    ),
    DayOutcome::Empty => tracing::info!(%target, %date, "empty upstream grid; day left untouched"),
    DayOutcome::Failed(reason) => tracing::warn!(%target, %date, %reason, "day skipped"),
  }
}
