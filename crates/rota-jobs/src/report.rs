//! Typed outcomes returned by the jobs.
//!
//! Each loop records what happened to every unit of work (a day, a batch, a
//! record) so callers and tests can assert on behaviour without reading logs.

use chrono::NaiveDate;
use rota_core::{
  reconcile::{PurgeOutcome, PurgeResult, ReconcileTarget, RemovalReason},
  violation::Verdict,
};
use strum::Display;

// ─── Days ────────────────────────────────────────────────────────────────────

/// What happened to one calendar day of a windowed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayOutcome<T> {
  Done(T),
  /// Upstream had nothing for the day.
  Empty,
  /// The day was skipped after a fetch or write failure.
  Failed(String),
}

impl<T> DayOutcome<T> {
  pub fn done(&self) -> Option<&T> {
    match self {
      DayOutcome::Done(t) => Some(t),
      _ => None,
    }
  }

  pub fn is_failed(&self) -> bool { matches!(self, DayOutcome::Failed(_)) }
}

// ─── History merge ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeTally {
  /// Rows inserted or updated.
  pub written:   usize,
  /// Items dropped before touching the store: canceled, or no route code.
  pub discarded: usize,
  /// Repeated route codes folded into a single row.
  pub folded:    usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
  pub days:       Vec<(NaiveDate, DayOutcome<MergeTally>)>,
  /// `None` when the distance backfill failed.
  pub backfilled: Option<usize>,
}

impl MergeReport {
  pub fn written(&self) -> usize {
    self.days.iter().filter_map(|(_, o)| o.done()).map(|t| t.written).sum()
  }

  pub fn failed_days(&self) -> usize { self.days.iter().filter(|(_, o)| o.is_failed()).count() }
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeTally {
  pub canceled: usize,
  pub missing:  usize,
  /// Rows actually deleted across all pairs.
  pub rows:     usize,
  /// Pairs whose delete failed and was rolled back.
  pub failed:   usize,
  pub results:  Vec<PurgeResult>,
}

impl PurgeTally {
  pub fn from_results(results: Vec<PurgeResult>) -> Self {
    let mut tally = PurgeTally::default();
    for r in &results {
      match &r.outcome {
        PurgeOutcome::Deleted(n) => {
          tally.rows += n;
          match r.removal.reason {
            RemovalReason::Canceled => tally.canceled += 1,
            RemovalReason::Missing => tally.missing += 1,
          }
        }
        PurgeOutcome::Failed(_) => tally.failed += 1,
      }
    }
    tally.results = results;
    tally
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassDay {
  pub date:    NaiveDate,
  pub target:  ReconcileTarget,
  pub outcome: DayOutcome<PurgeTally>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
  pub passes: Vec<PassDay>,
}

impl ReconcileReport {
  /// Every successful removal for `target`, with its date.
  pub fn removed(&self, target: ReconcileTarget) -> Vec<(NaiveDate, &PurgeResult)> {
    self
      .passes
      .iter()
      .filter(|p| p.target == target)
      .filter_map(|p| p.outcome.done().map(|t| (p.date, t)))
      .flat_map(|(date, t)| {
        t.results
          .iter()
          .filter(|r| matches!(r.outcome, PurgeOutcome::Deleted(_)))
          .map(move |r| (date, r))
      })
      .collect()
  }

  pub fn total(&self, target: ReconcileTarget) -> PurgeTally {
    let mut sum = PurgeTally::default();
    for t in self.passes.iter().filter(|p| p.target == target).filter_map(|p| p.outcome.done()) {
      sum.canceled += t.canceled;
      sum.missing += t.missing;
      sum.rows += t.rows;
      sum.failed += t.failed;
    }
    sum
  }
}

// ─── Violation ingestion ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestTally {
  pub fetched:    usize,
  pub inserted:   usize,
  /// Items already stored under their (route name, date).
  pub duplicates: usize,
  /// Items with no route name to key them by.
  pub unnamed:    usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
  pub date:    NaiveDate,
  pub outcome: DayOutcome<IngestTally>,
}

// ─── Enriched view ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewReport {
  pub cleared:        usize,
  pub batches:        usize,
  pub rows:           usize,
  pub failed_batches: usize,
}

// ─── Classifier ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
  AlreadyClassified,
  MissingVehicle,
  MissingWindow,
  UnparseableWindow,
}

/// What the classifier did with one enriched row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
  Skipped(SkipReason),
  /// The matched trip no longer exists; the inconsistent-data verdict was
  /// written.
  Inconsistent { written: bool },
  /// Upstream returned no samples; left for the next pass.
  NoSamples,
  Classified { verdict: Verdict, written: bool },
  /// Soft failure; left for the next pass.
  Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifyReport {
  pub pages:    usize,
  pub outcomes: Vec<(i64, RecordOutcome)>,
}

impl ClassifyReport {
  pub fn outcome(&self, violation_id: i64) -> Option<&RecordOutcome> {
    self.outcomes.iter().find(|(id, _)| *id == violation_id).map(|(_, o)| o)
  }

  pub fn count(&self, pred: impl Fn(&RecordOutcome) -> bool) -> usize {
    self.outcomes.iter().filter(|(_, o)| pred(o)).count()
  }
}
