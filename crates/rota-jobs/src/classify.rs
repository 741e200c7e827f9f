//! The violation classifier: decide a verdict for every unclassified
//! enriched row from the vehicle's position telemetry.

use chrono_tz::Tz;
use rota_core::{
  feed::TransitFeed,
  policy::Policy,
  store::TripStore,
  time::UtcWindow,
  violation::{EnrichedRow, Verdict, classify},
};
use tracing::Instrument as _;
use uuid::Uuid;

use crate::{
  Error, Result,
  report::{ClassifyReport, RecordOutcome, SkipReason},
};

/// Walk the enriched view in pages of `policy.classifier_batch_size` and
/// write a verdict on the base violation table for each row that lacks one.
///
/// Per-record problems never abort the pass; only a failure to read a page
/// does.
pub async fn classify_violations<S, F>(
  store: &S,
  feed: &F,
  policy: &Policy,
  tz: Tz,
) -> Result<ClassifyReport>
where
  S: TripStore,
  F: TransitFeed,
{
  let span = tracing::info_span!("classify_violations", run_id = %Uuid::new_v4());
  async move {
    let batch = policy.classifier_batch_size.max(1);
    let mut report = ClassifyReport::default();
    let mut offset = 0;

    loop {
      let page = store.enriched_page(offset, batch).await.map_err(Error::store)?;
      if page.is_empty() {
        break;
      }
      report.pages += 1;
      tracing::debug!(page = report.pages, offset, rows = page.len(), "classifier page");

      for row in page {
        let id = row.violation_id;
        let outcome = classify_row(store, feed, policy, tz, &row)
          .instrument(tracing::debug_span!(
            "violation",
            violation_id = id,
            route = %row.route_name,
            date = %row.service_date,
            vehicle = row.real_vehicle.as_deref().unwrap_or("")
          ))
          .await;
        log_outcome(&row, &outcome);

        if matches!(outcome, RecordOutcome::Classified { .. }) {
          tokio::time::sleep(policy.classifier_pause()).await;
        }
        report.outcomes.push((id, outcome));
      }
      offset += batch;
    }

    tracing::info!(
      pages = report.pages,
      visited = report.outcomes.len(),
      classified = report.count(|o| matches!(o, RecordOutcome::Classified { .. })),
      inconsistent = report.count(|o| matches!(o, RecordOutcome::Inconsistent { .. })),
      no_samples = report.count(|o| matches!(o, RecordOutcome::NoSamples)),
      failed = report.count(|o| matches!(o, RecordOutcome::Failed(_))),
      "classifier pass finished"
    );
    Ok(report)
  }
  .instrument(span)
  .await
}

async fn classify_row<S, F>(
  store: &S,
  feed: &F,
  policy: &Policy,
  tz: Tz,
  row: &EnrichedRow,
) -> RecordOutcome
where
  S: TripStore,
  F: TransitFeed,
{
  match try_classify_row(store, feed, policy, tz, row).await {
    Ok(outcome) => outcome,
    Err(e) => RecordOutcome::Failed(e.to_string()),
  }
}

async fn try_classify_row<S, F>(
  store: &S,
  feed: &F,
  policy: &Policy,
  tz: Tz,
  row: &EnrichedRow,
) -> Result<RecordOutcome>
where
  S: TripStore,
  F: TransitFeed,
{
  if row.is_classified() {
    return Ok(RecordOutcome::Skipped(SkipReason::AlreadyClassified));
  }

  let trip_exists = match row.trip_id {
    Some(trip_id) => store.trip_exists(trip_id).await.map_err(Error::store)?,
    None => false,
  };
  if !trip_exists {
    let written = write_verdict(store, row.violation_id, Verdict::InconsistentData).await?;
    return Ok(RecordOutcome::Inconsistent { written });
  }

  let Some(vehicle) = row.real_vehicle.as_deref().filter(|v| !v.trim().is_empty()) else {
    return Ok(RecordOutcome::Skipped(SkipReason::MissingVehicle));
  };
  let (Some(start), Some(end)) = (row.real_departure.as_deref(), row.real_arrival.as_deref())
  else {
    return Ok(RecordOutcome::Skipped(SkipReason::MissingWindow));
  };
  let Some(window) = UtcWindow::from_local(start, end, tz) else {
    return Ok(RecordOutcome::Skipped(SkipReason::UnparseableWindow));
  };

  let samples = feed.positions(vehicle, window).await.map_err(Error::feed)?;
  let Some(verdict) = classify(&samples, policy.speed_limit) else {
    return Ok(RecordOutcome::NoSamples);
  };

  let written = write_verdict(store, row.violation_id, verdict).await?;
  Ok(RecordOutcome::Classified { verdict, written })
}

/// Write-back on the base table, re-establishing the session first.
async fn write_verdict<S: TripStore>(
  store: &S,
  violation_id: i64,
  verdict: Verdict,
) -> Result<bool> {
  store.ensure_session().await.map_err(Error::store)?;
  store.set_verdict(violation_id, verdict).await.map_err(Error::store)
}

fn log_outcome(row: &EnrichedRow, outcome: &RecordOutcome) {
  let vehicle = row.real_vehicle.as_deref().unwrap_or("");
  match outcome {
    RecordOutcome::Skipped(SkipReason::AlreadyClassified) => {}
    RecordOutcome::Skipped(reason) => tracing::debug!(
      violation_id = row.violation_id,
      route = %row.route_name,
      vehicle,
      %reason,
      "left unclassified"
    ),
    RecordOutcome::Inconsistent { written } => tracing::warn!(
      violation_id = row.violation_id,
      route = %row.route_name,
      date = %row.service_date,
      trip_id = ?row.trip_id,
      written,
      "matched trip is gone; marked inconsistent"
    ),
    RecordOutcome::NoSamples => tracing::debug!(
      violation_id = row.violation_id,
      route = %row.route_name,
      vehicle,
      "no position samples"
    ),
    RecordOutcome::Classified { verdict, written } => tracing::info!(
      violation_id = row.violation_id,
      route = %row.route_name,
      vehicle,
      %verdict,
      written,
      "classified"
    ),
    RecordOutcome::Failed(error) => tracing::warn!(
      violation_id = row.violation_id,
      route = %row.route_name,
      date = %row.service_date,
      vehicle,
      %error,
      "classification failed"
    ),
  }
}
