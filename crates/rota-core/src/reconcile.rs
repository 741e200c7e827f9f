//! Removal planning for the reconciler.
//!
//! A stored identifier for a date is removed when the day's upstream snapshot
//! cancels it or no longer lists it, and only when the canonical route set
//! vouches for it. The same plan drives both passes; they differ only in the
//! destination table and the identifier they key on.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The table a reconciliation pass targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ReconcileTarget {
  /// Historical trips, keyed by route integration code.
  Trips,
  /// Violation records, keyed by normalised route name.
  Violations,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
  EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
  /// Flagged as canceled in the day's snapshot.
  Canceled,
  /// Absent from the day's snapshot altogether.
  Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Removal {
  pub key:    String,
  pub reason: RemovalReason,
}

/// The outcome of deleting one (key, date) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurgeOutcome {
  Deleted(usize),
  Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeResult {
  pub removal: Removal,
  pub outcome: PurgeOutcome,
}

/// The identifiers a day's snapshot cancels and the ones it keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotKeys {
  pub canceled: BTreeSet<String>,
  pub present:  BTreeSet<String>,
}

impl SnapshotKeys {
  /// Project snapshot items onto keys. Items whose key cannot be resolved
  /// are ignored.
  pub fn collect<T>(
    items: &[T],
    canceled: impl Fn(&T) -> bool,
    key: impl Fn(&T) -> Option<String>,
  ) -> Self {
    let mut keys = Self::default();
    for item in items {
      let Some(k) = key(item).filter(|k| !k.is_empty()) else {
        continue;
      };
      if canceled(item) {
        keys.canceled.insert(k);
      } else {
        keys.present.insert(k);
      }
    }
    keys
  }
}

/// Compute `(stored ∩ canceled) ∪ (stored − present)`, restricted to keys
/// the `authorised` predicate accepts. A key both canceled and missing is
/// reported as canceled.
pub fn plan_removals(
  stored: &BTreeSet<String>,
  snapshot: &SnapshotKeys,
  authorised: impl Fn(&str) -> bool,
) -> Vec<Removal> {
  stored
    .iter()
    .filter(|key| authorised(key))
    .filter_map(|key| {
      let reason = if snapshot.canceled.contains(key) {
        RemovalReason::Canceled
      } else if !snapshot.present.contains(key) {
        RemovalReason::Missing
      } else {
        return None;
      };
      Some(Removal { key: key.clone(), reason })
    })
    .collect()
}
