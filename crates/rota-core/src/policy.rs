//! Tunable policy for the pipeline jobs.
//!
//! The speed threshold and the non-conformity tolerances are policy, not
//! mechanism, so they live here next to the batch sizes and windows rather
//! than as literals in the jobs.

use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Policy {
  /// Velocity (upstream units) above which a trip is "speed exceeded".
  pub speed_limit:                 f64,
  pub delay_tolerance_minutes:     u32,
  pub earliness_tolerance_minutes: u32,
  /// Days merged into history per run, counting today.
  pub merge_window_days:           u32,
  /// Rolling window checked by the reconciler, counting today.
  pub reconcile_window_days:       u32,
  /// Retries of a day's batched write after lock-wait contention.
  pub lock_retry_attempts:         u32,
  /// Linear backoff unit: retry `n` waits `n * lock_retry_backoff_ms`.
  pub lock_retry_backoff_ms:       u64,
  /// Route identifiers per batched existence query.
  pub existence_chunk_size:        usize,
  pub view_batch_size:             usize,
  pub classifier_batch_size:       usize,
  /// Pause after every fully processed classifier record.
  pub classifier_pause_ms:         u64,
  pub distance_backfill_days:      u32,
}

impl Default for Policy {
  fn default() -> Self {
    Self {
      speed_limit:                 70.0,
      delay_tolerance_minutes:     5,
      earliness_tolerance_minutes: 5,
      merge_window_days:           10,
      reconcile_window_days:       10,
      lock_retry_attempts:         3,
      lock_retry_backoff_ms:       2_000,
      existence_chunk_size:        500,
      view_batch_size:             500,
      classifier_batch_size:       10,
      classifier_pause_ms:         1_000,
      distance_backfill_days:      7,
    }
  }
}

impl Policy {
  pub fn validate(&self) -> Result<()> {
    if !self.speed_limit.is_finite() || self.speed_limit < 0.0 {
      return Err(Error::InvalidPolicy(format!(
        "speed_limit must be a non-negative number, got {}",
        self.speed_limit
      )));
    }
    for (name, value) in [
      ("existence_chunk_size", self.existence_chunk_size),
      ("view_batch_size", self.view_batch_size),
      ("classifier_batch_size", self.classifier_batch_size),
    ] {
      if value == 0 {
        return Err(Error::InvalidPolicy(format!("{name} must be positive")));
      }
    }
    Ok(())
  }

  /// Delay before retry number `attempt` (1-based).
  pub fn lock_retry_delay(&self, attempt: u32) -> Duration {
    Duration::from_millis(self.lock_retry_backoff_ms.saturating_mul(u64::from(attempt)))
  }

  pub fn classifier_pause(&self) -> Duration { Duration::from_millis(self.classifier_pause_ms) }
}
