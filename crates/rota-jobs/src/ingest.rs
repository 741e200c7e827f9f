//! Violation ingestion from the upstream non-conformity list.

use chrono::NaiveDate;
use rota_core::{
  feed::TransitFeed,
  store::TripStore,
  violation::{NewViolation, PlaybackRewrite},
};
use tracing::Instrument as _;
use uuid::Uuid;

use crate::report::{DayOutcome, IngestReport, IngestTally};

/// Store one violation per flagged route for `today`. Items already stored
/// under their (route name, date) are counted as duplicates.
pub async fn ingest_violations<S, F>(
  store: &S,
  feed: &F,
  rewrite: &PlaybackRewrite,
  today: NaiveDate,
) -> IngestReport
where
  S: TripStore,
  F: TransitFeed,
{
  let span = tracing::info_span!("ingest_violations", run_id = %Uuid::new_v4(), date = %today);
  async move {
    let outcome = ingest_day(store, feed, rewrite, today).await;
    match &outcome {
      DayOutcome::Done(t) => tracing::info!(
        fetched = t.fetched,
        inserted = t.inserted,
        duplicates = t.duplicates,
        unnamed = t.unnamed,
        "violations ingested"
      ),
      DayOutcome::Empty => tracing::info!("no violations upstream"),
      DayOutcome::Failed(reason) => tracing::warn!(%reason, "ingestion skipped"),
    }
    IngestReport { date: today, outcome }
  }
  .instrument(span)
  .await
}

async fn ingest_day<S, F>(
  store: &S,
  feed: &F,
  rewrite: &PlaybackRewrite,
  today: NaiveDate,
) -> DayOutcome<IngestTally>
where
  S: TripStore,
  F: TransitFeed,
{
  let items = match feed.non_conformities(today).await {
    Ok(items) => items,
    Err(e) => return DayOutcome::Failed(format!("fetching non-conformities: {e}")),
  };
  if items.is_empty() {
    return DayOutcome::Empty;
  }

  let fetched = items.len();
  let violations: Vec<NewViolation> = items
    .into_iter()
    .filter_map(|item| NewViolation::from_upstream(item, today, rewrite))
    .collect();
  let unnamed = fetched - violations.len();
  let candidates = violations.len();

  match store.insert_violations(violations).await {
    Ok(inserted) => DayOutcome::Done(IngestTally {
      fetched,
      inserted,
      duplicates: candidates - inserted,
      unnamed,
    }),
    Err(e) => DayOutcome::Failed(format!("inserting {candidates} violations: {e}")),
  }
}
