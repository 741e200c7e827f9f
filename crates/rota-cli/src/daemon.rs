//! Long-running mode: each job on its own fixed schedule.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Days, TimeZone as _, Utc};
use chrono_tz::Tz;
use tokio::{
  task::JoinSet,
  time::{MissedTickBehavior, interval},
};

use crate::pipeline::{Job, Pipeline};

/// Spawn every schedule and run until Ctrl-C or until a schedule task dies.
pub async fn run(pipeline: Pipeline) -> anyhow::Result<()> {
  let schedule = pipeline.config().schedule.clone();
  let pipeline = Arc::new(pipeline);
  let mut tasks = JoinSet::new();

  for (job, minutes) in [
    (Job::Merge, schedule.grid_minutes),
    (Job::Violations, schedule.violations_minutes),
    (Job::RebuildView, schedule.view_minutes),
  ] {
    tasks.spawn(every(pipeline.clone(), job, Duration::from_secs(minutes * 60)));
  }
  tasks.spawn(daily(pipeline.clone(), Job::Reconcile, schedule.reconcile_hour));

  tracing::info!(
    grid_minutes = schedule.grid_minutes,
    violations_minutes = schedule.violations_minutes,
    view_minutes = schedule.view_minutes,
    reconcile_hour = schedule.reconcile_hour,
    "daemon started"
  );

  let result = tokio::select! {
    signal = tokio::signal::ctrl_c() => {
      tracing::info!("shutting down");
      signal.map_err(Into::into)
    }
    Some(joined) = tasks.join_next() => match joined {
      Ok(()) => Err(anyhow::anyhow!("a schedule stopped unexpectedly")),
      Err(e) => Err(anyhow::anyhow!("schedule task failed: {e}")),
    },
  };

  tasks.shutdown().await;
  result
}

/// Run `job` every `period`. A run that overruns swallows the ticks it
/// missed, so a job never overlaps itself.
async fn every(pipeline: Arc<Pipeline>, job: Job, period: Duration) {
  let mut ticker = interval(period);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
  loop {
    ticker.tick().await;
    if pipeline.run(job).await.is_err() {
      tracing::debug!(%job, "schedule continues after failed run");
    }
  }
}

/// Run `job` once a day at `hour`:00 local time.
async fn daily(pipeline: Arc<Pipeline>, job: Job, hour: u32) {
  let tz = pipeline.timezone();
  loop {
    let now = Utc::now().with_timezone(&tz);
    let wait = until_next_hour(now, hour).unwrap_or_else(|| {
      tracing::warn!(%job, hour, "cannot place next run in local time; waiting a day");
      Duration::from_secs(24 * 60 * 60)
    });
    tracing::debug!(%job, wait_secs = wait.as_secs(), "next daily run scheduled");
    tokio::time::sleep(wait).await;
    if pipeline.run(job).await.is_err() {
      tracing::debug!(%job, "schedule continues after failed run");
    }
  }
}

/// Time from `now` until the next `hour`:00 strictly after it, in `now`'s
/// zone. A day whose `hour`:00 falls in a DST gap is skipped.
pub fn until_next_hour(now: DateTime<Tz>, hour: u32) -> Option<Duration> {
  let tz = now.timezone();
  (0..=2).find_map(|offset| {
    let local = now
      .date_naive()
      .checked_add_days(Days::new(offset))?
      .and_hms_opt(hour, 0, 0)?;
    let at = tz.from_local_datetime(&local).earliest()?;
    (at > now).then(|| (at - now).to_std().ok()).flatten()
  })
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone as _;
  use chrono_tz::America::Sao_Paulo;

  use super::*;

  fn at(h: u32, m: u32) -> DateTime<Tz> {
    Sao_Paulo.with_ymd_and_hms(2024, 5, 10, h, m, 0).unwrap()
  }

  #[test]
  fn later_today() {
    assert_eq!(until_next_hour(at(18, 30), 19), Some(Duration::from_secs(30 * 60)));
  }

  #[test]
  fn rolls_over_to_tomorrow() {
    let expected = Duration::from_secs(23 * 3600 + 30 * 60);
    assert_eq!(until_next_hour(at(19, 30), 19), Some(expected));
  }

  #[test]
  fn exactly_on_the_hour_waits_a_full_day() {
    assert_eq!(until_next_hour(at(19, 0), 19), Some(Duration::from_secs(24 * 3600)));
  }

  #[test]
  fn midnight_target() {
    assert_eq!(until_next_hour(at(23, 0), 0), Some(Duration::from_secs(3600)));
  }
}
