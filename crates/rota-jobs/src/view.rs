//! Enriched-view rebuild.

use rota_core::{policy::Policy, store::TripStore};
use tracing::Instrument as _;
use uuid::Uuid;

use crate::{Error, Result, report::ViewReport};

/// Truncate the enriched view and repopulate it by walking the violation
/// table in ascending id batches of `policy.view_batch_size`.
///
/// A batch that fails to materialise is logged and skipped. Failing to clear
/// the view, or to page violation ids, aborts the rebuild.
pub async fn rebuild_enriched_view<S: TripStore>(
  store: &S,
  policy: &Policy,
) -> Result<ViewReport> {
  let span = tracing::info_span!("rebuild_enriched_view", run_id = %Uuid::new_v4());
  async move {
    let mut report = ViewReport {
      cleared: store.clear_enriched_view().await.map_err(Error::store)?,
      ..Default::default()
    };

    let mut after = 0;
    loop {
      let ids = store
        .violation_ids_after(after, policy.view_batch_size)
        .await
        .map_err(Error::store)?;
      let Some(&last) = ids.last() else {
        break;
      };
      let (first, len) = (ids[0], ids.len());
      after = last;
      report.batches += 1;

      match store.materialize_enriched(ids).await {
        Ok(rows) => report.rows += rows,
        Err(e) => {
          report.failed_batches += 1;
          tracing::warn!(first, last, len, error = %e, "batch not materialised");
        }
      }
    }

    tracing::info!(
      cleared = report.cleared,
      batches = report.batches,
      rows = report.rows,
      failed_batches = report.failed_batches,
      "enriched view rebuilt"
    );
    Ok(report)
  }
  .instrument(span)
  .await
}
