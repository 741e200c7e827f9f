//! One invocation of each job against the configured store and upstream.

use std::{path::Path, time::Instant};

use anyhow::Context as _;
use chrono::Utc;
use chrono_tz::Tz;
use rota_core::{route::CanonicalRoute, store::TripStore, time::local_today};
use rota_jobs::{
  classify_violations, ingest_violations, merge_history, rebuild_enriched_view, reconcile,
  report::DayOutcome,
};
use rota_store_sqlite::SqliteStore;
use rota_upstream::UpstreamClient;
use tokio::sync::Mutex;

use crate::config::AppConfig;

/// The schedulable units of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Job {
  /// History merge followed by the last-execution marker.
  Merge,
  Reconcile,
  Ingest,
  Classify,
  /// Ingestion then classification, as the daemon schedules them.
  Violations,
  RebuildView,
}

impl Job {
  /// Jobs that read or rebuild the enriched view. They run one at a time, so
  /// a rebuild never truncates the view under a classifier's pagination.
  fn uses_view(self) -> bool {
    matches!(self, Job::Classify | Job::Violations | Job::RebuildView)
  }
}

/// Everything a job needs. The store session is opened once and shared; the
/// upstream token is obtained per invocation.
pub struct Pipeline {
  store:     SqliteStore,
  config:    AppConfig,
  tz:        Tz,
  view_lock: Mutex<()>,
}

impl Pipeline {
  pub async fn open(config: AppConfig) -> anyhow::Result<Self> {
    let tz = config.tz()?;
    let store = SqliteStore::open(&config.database_path)
      .await
      .with_context(|| format!("failed to open store at {:?}", config.database_path))?;
    Ok(Self { store, config, tz, view_lock: Mutex::new(()) })
  }

  pub fn config(&self) -> &AppConfig { &self.config }

  pub fn timezone(&self) -> Tz { self.tz }

  /// Run `job` to completion, logging its duration and any error.
  pub async fn run(&self, job: Job) -> anyhow::Result<()> {
    let _view = if job.uses_view() { Some(self.view_lock.lock().await) } else { None };
    let started = Instant::now();
    tracing::info!(%job, "job started");

    let result = match job {
      Job::Merge => self.merge().await,
      Job::Reconcile => self.reconcile().await,
      Job::Ingest => self.ingest().await,
      Job::Classify => self.classify().await,
      Job::Violations => self.violations().await,
      Job::RebuildView => self.rebuild_view().await,
    };

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match &result {
      Ok(()) => tracing::info!(%job, elapsed_ms, "job finished"),
      Err(e) => {
        let error = format!("{e:#}");
        tracing::error!(%job, elapsed_ms, %error, "job failed");
      }
    }
    result
  }

  /// One full cycle, in dependency order. Stops at the first fatal error.
  pub async fn run_all(&self) -> anyhow::Result<()> {
    for job in [Job::Merge, Job::Reconcile, Job::Ingest, Job::RebuildView, Job::Classify] {
      self.run(job).await?;
    }
    Ok(())
  }

  // ─── Jobs ─────────────────────────────────────────────────────────────────

  async fn merge(&self) -> anyhow::Result<()> {
    let feed = self.connect().await?;
    let now = Utc::now().with_timezone(&self.tz).naive_local();
    let report = merge_history(&self.store, &feed, &self.config.policy, now).await;

    if !report.days.is_empty() && report.failed_days() == report.days.len() {
      anyhow::bail!("history merge failed for every day in the window");
    }
    self
      .store
      .mark_executed(Utc::now())
      .await
      .context("failed to record last execution")?;
    Ok(())
  }

  async fn reconcile(&self) -> anyhow::Result<()> {
    let feed = self.connect().await?;
    let today = local_today(self.tz);
    reconcile(&self.store, &feed, &self.config.policy, today).await?;
    Ok(())
  }

  async fn ingest(&self) -> anyhow::Result<()> {
    let feed = self.connect().await?;
    let rewrite = self.config.upstream()?.playback_rewrite();
    let report = ingest_violations(&self.store, &feed, &rewrite, local_today(self.tz)).await;
    if let DayOutcome::Failed(reason) = report.outcome {
      anyhow::bail!("violation ingestion for {} failed: {reason}", report.date);
    }
    Ok(())
  }

  async fn classify(&self) -> anyhow::Result<()> {
    let feed = self.connect().await?;
    classify_violations(&self.store, &feed, &self.config.policy, self.tz).await?;
    Ok(())
  }

  async fn violations(&self) -> anyhow::Result<()> {
    self.ingest().await?;
    self.classify().await
  }

  async fn rebuild_view(&self) -> anyhow::Result<()> {
    self.session().await?;
    rebuild_enriched_view(&self.store, &self.config.policy).await?;
    Ok(())
  }

  // ─── Administration ───────────────────────────────────────────────────────

  pub async fn migrate(&self) -> anyhow::Result<()> {
    let outcomes = self.store.migrate().await.context("migration failed")?;
    for outcome in outcomes {
      tracing::debug!(?outcome, "column migration");
    }
    match self.store.last_executed().await.context("failed to read marker")? {
      Some(at) => tracing::info!(last_executed = %at, "schema up to date"),
      None => tracing::info!("schema up to date; no history run recorded yet"),
    }
    Ok(())
  }

  pub async fn import_routes(&self, file: &Path) -> anyhow::Result<usize> {
    let raw = tokio::fs::read_to_string(file)
      .await
      .with_context(|| format!("failed to read {file:?}"))?;
    let routes: Vec<CanonicalRoute> =
      serde_json::from_str(&raw).with_context(|| format!("{file:?} is not a route list"))?;
    let count = self
      .store
      .import_canonical_routes(routes)
      .await
      .context("failed to import canonical routes")?;
    tracing::info!(count, file = %file.display(), "canonical routes replaced");
    Ok(count)
  }

  // ─── Helpers ──────────────────────────────────────────────────────────────

  async fn session(&self) -> anyhow::Result<()> {
    self.store.ensure_session().await.context("database session unavailable")
  }

  /// Re-establish the store session and log in upstream. Either failure is
  /// fatal to the job.
  async fn connect(&self) -> anyhow::Result<UpstreamClient> {
    self.session().await?;
    let upstream = self.config.upstream()?.clone();
    UpstreamClient::connect(upstream, &self.config.policy)
      .await
      .context("upstream login failed")
  }
}

#[cfg(test)]
mod tests {
  use std::{io::Write as _, time::Duration};

  use rota_core::route::RouteCatalog;

  use super::*;

  async fn pipeline(dir: &Path) -> Pipeline {
    let settings = config::Config::builder()
      .set_override("database_path", dir.join("rota.db").to_string_lossy().into_owned())
      .unwrap()
      .build()
      .unwrap();
    Pipeline::open(AppConfig::from_settings(settings).unwrap()).await.unwrap()
  }

  #[test]
  fn job_names_are_snake_case() {
    assert_eq!(Job::RebuildView.to_string(), "rebuild_view");
    assert_eq!(Job::Merge.to_string(), "merge");
  }

  #[tokio::test]
  async fn imports_routes_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path()).await;

    let path = dir.path().join("routes.json");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(
      f,
      r#"[
        {{"route_integration_code": "R1", "route_name": "Rota A", "client_name": "Prefeitura"}},
        {{"route_integration_code": "R2", "route_name": "Rota B"}}
      ]"#
    )
    .unwrap();

    assert_eq!(p.import_routes(&path).await.unwrap(), 2);
    let catalog: RouteCatalog = p.store.canonical_routes().await.unwrap().into_iter().collect();
    assert!(catalog.contains_code("R2"));
    assert!(catalog.contains_name("rota a"));
  }

  #[tokio::test]
  async fn job_without_credentials_fails_before_touching_upstream() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path()).await;
    let err = p.run(Job::Reconcile).await.unwrap_err();
    assert!(err.to_string().contains("[upstream]"));
  }

  #[tokio::test]
  async fn view_jobs_wait_for_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path()).await;

    let held = p.view_lock.lock().await;
    let blocked =
      tokio::time::timeout(Duration::from_millis(200), p.run(Job::RebuildView)).await;
    assert!(blocked.is_err(), "rebuild ran while the view was in use");
    drop(held);

    p.run(Job::RebuildView).await.unwrap();
  }

  #[tokio::test]
  async fn rebuild_view_needs_no_upstream() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path()).await;
    p.run(Job::RebuildView).await.unwrap();
    p.migrate().await.unwrap();
  }
}
