//! `rota`: keeps a local trip history in step with the upstream telemetry
//! service and classifies flagged trips.
//!
//! Reads `rota.toml` (or the path given with `--config`) layered under
//! `ROTA_*` environment variables, e.g. `ROTA_UPSTREAM__PASSWORD`.
//!
//! ```sh
//! rota routes import routes.json   # seed the canonical route set
//! rota run                         # one full cycle
//! rota daemon                      # every job on its schedule
//! ```

mod config;
mod daemon;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{
  config::AppConfig,
  pipeline::{Job, Pipeline},
};

#[derive(Parser)]
#[command(author, version, about = "Trip history sync and violation classifier")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "rota.toml", env = "ROTA_CONFIG")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create or upgrade the database schema.
  Migrate,
  /// Merge the recent upstream trip grids into history.
  Merge,
  /// Remove trips and violations the upstream canceled or dropped.
  Reconcile,
  /// Store today's non-conformities as violations.
  Ingest,
  /// Decide a verdict for unclassified violations.
  Classify,
  /// Rebuild the enriched violation view.
  RebuildView,
  /// One full cycle: merge, reconcile, ingest, rebuild view, classify.
  Run,
  /// Run every job on its configured schedule until interrupted.
  Daemon,
  /// Manage the canonical route set.
  Routes {
    #[command(subcommand)]
    action: RoutesCommand,
  },
}

#[derive(Subcommand)]
enum RoutesCommand {
  /// Replace the canonical routes with the contents of a JSON array.
  Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let config = AppConfig::load(&cli.config)?;
  let pipeline = Pipeline::open(config).await?;

  match cli.command {
    Command::Migrate => pipeline.migrate().await,
    Command::Merge => pipeline.run(Job::Merge).await,
    Command::Reconcile => pipeline.run(Job::Reconcile).await,
    Command::Ingest => pipeline.run(Job::Ingest).await,
    Command::Classify => pipeline.run(Job::Classify).await,
    Command::RebuildView => pipeline.run(Job::RebuildView).await,
    Command::Run => pipeline.run_all().await,
    Command::Daemon => daemon::run(pipeline).await,
    Command::Routes { action: RoutesCommand::Import { file } } => {
      let count = pipeline.import_routes(&file).await?;
      println!("imported {count} canonical routes");
      Ok(())
    }
  }
}
